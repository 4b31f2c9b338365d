use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

// Toast-style feedback channel. The store pushes, whatever presentation
// layer is attached drains. A detached receiver is not an error.
#[derive(Debug, Clone)]
pub struct NoticeFeed {
    tx: mpsc::UnboundedSender<Notice>,
}

impl NoticeFeed {
    pub fn push(&self, notice: Notice) {
        debug!(kind = ?notice.kind, message = %notice.message, "notice");
        let _ = self.tx.send(notice);
    }
}

pub fn channel() -> (NoticeFeed, mpsc::UnboundedReceiver<Notice>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NoticeFeed { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_notices_arrive_in_order() {
        let (feed, mut rx) = channel();
        feed.push(Notice::success("Task added!"));
        feed.push(Notice::error("Could not update task"));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, NoticeKind::Success);
        assert_eq!(first.message, "Task added!");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, NoticeKind::Error);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn push_without_receiver_is_silent() {
        let (feed, rx) = channel();
        drop(rx);
        feed.push(Notice::success("Task deleted"));
    }
}
