use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::Local;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::notice::{Notice, NoticeKind};
use crate::task::{Priority, Status, Task};
use crate::view::StatusCounts;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_task_table(&mut self, tasks: &[Task]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Created".to_string(),
            "Status".to_string(),
            "Pri".to_string(),
            "Title".to_string(),
            "Description".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = self.paint(&short_id(task), "33");
            let created = task
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d")
                .to_string();
            let status = self.paint(task.status.as_str(), status_color(task.status));
            let priority = self.paint(task.priority.as_str(), priority_color(task.priority));
            let description = task.description.clone().unwrap_or_default();

            rows.push(vec![
                id,
                created,
                status,
                priority,
                task.title.clone(),
                description,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&mut self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(
            out,
            "description {}",
            task.description.as_deref().unwrap_or("(none)")
        )?;
        writeln!(out, "status      {}", task.status)?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(out, "owner       {}", task.owner_id)?;
        writeln!(out, "created     {}", task.created_at.format("%Y%m%dT%H%M%SZ"))?;
        writeln!(out, "updated     {}", task.updated_at.format("%Y%m%dT%H%M%SZ"))?;

        Ok(())
    }

    pub fn print_counts(&mut self, counts: &StatusCounts) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "To Do        {}", counts.todo)?;
        writeln!(out, "In Progress  {}", counts.in_progress)?;
        writeln!(out, "Done         {}", counts.completed)?;
        writeln!(out, "Total        {}", counts.total())?;
        Ok(())
    }

    pub fn print_notice(&mut self, notice: &Notice) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let line = match notice.kind {
            NoticeKind::Success => self.paint(&format!("* {}", notice.message), "32"),
            NoticeKind::Error => self.paint(&format!("! {}", notice.message), "31"),
        };
        writeln!(out, "{line}")?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(task: &Task) -> String {
    task.id.simple().to_string()[..8].to_string()
}

fn status_color(status: Status) -> &'static str {
    match status {
        Status::Todo => "33",
        Status::InProgress => "36",
        Status::Completed => "32",
    }
}

fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "2",
        Priority::Medium => "0",
        Priority::High => "31",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    write_row(&mut writer, &headers, &widths)?;

    let underline: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(&mut writer, &underline, &widths)?;

    for row in &rows {
        write_row(&mut writer, row, &widths)?;
    }

    Ok(())
}

fn write_row<W: Write>(mut writer: W, cells: &[String], widths: &[usize]) -> anyhow::Result<()> {
    let mut line = String::new();
    for (idx, cell) in cells.iter().enumerate() {
        if idx > 0 {
            line.push_str("  ");
        }
        line.push_str(cell);
        let printed = UnicodeWidthStr::width(strip_ansi(cell).as_str());
        let padding = widths[idx].saturating_sub(printed);
        line.push_str(&" ".repeat(padding));
    }
    writeln!(writer, "{}", line.trim_end())?;
    Ok(())
}

fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            for escaped in chars.by_ref() {
                if escaped == 'm' {
                    break;
                }
            }
            continue;
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn short_id_is_eight_hex_chars() {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: "x".to_string(),
            description: None,
            status: Status::Todo,
            priority: Priority::Medium,
            owner_id: Uuid::nil(),
            created_at: now,
            updated_at: now,
        };
        let id = short_id(&task);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn table_pads_columns_to_widest_cell() {
        let mut buffer = Vec::new();
        write_table(
            &mut buffer,
            vec!["A".to_string(), "B".to_string()],
            vec![
                vec!["wide cell".to_string(), "x".to_string()],
                vec!["y".to_string(), "z".to_string()],
            ],
        )
        .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("A"));
        assert!(lines[2].starts_with("wide cell  x"));
    }
}
