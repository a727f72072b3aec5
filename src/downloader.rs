#![cfg(not(tarpaulin_include))]

//! User activity report export (CSV and XLSX).

use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::tasks::{TaskStatus, TaskStore};
use crate::users::UserStore;

const HEADERS: [&str; 9] = [
    "Name",
    "Email",
    "Role",
    "Team",
    "Status",
    "Updates Submitted",
    "Last Update",
    "Open Tasks",
    "Completed Tasks",
];

/// One report line per user
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActivityRow {
    pub name: String,
    pub email: String,
    pub role: String,
    pub team: String,
    pub status: String,
    pub updates_submitted: usize,
    pub last_update: Option<NaiveDate>,
    pub open_tasks: usize,
    pub completed_tasks: usize,
}

impl ActivityRow {
    fn cells(&self) -> [String; 9] {
        [
            self.name.clone(),
            self.email.clone(),
            self.role.clone(),
            self.team.clone(),
            self.status.clone(),
            self.updates_submitted.to_string(),
            self.last_update.map(|d| d.to_string()).unwrap_or_default(),
            self.open_tasks.to_string(),
            self.completed_tasks.to_string(),
        ]
    }
}

/// Gather the activity report
///
/// # Arguments
/// * `users` - Every user gets one row
/// * `tasks` - Source of update and task counts
/// * `today` - Reference day for overdue tasks
///
/// # Returns
/// * `Result<Vec<ActivityRow>>` - Rows ordered by name
pub fn activity_rows(users: &UserStore, tasks: &TaskStore, today: NaiveDate) -> Result<Vec<ActivityRow>> {
    let updates = tasks.all_updates()?;
    let all_tasks = tasks.all_tasks(today)?;

    let mut rows: Vec<ActivityRow> = users
        .all()?
        .iter()
        .map(|user| {
            let mine = updates.iter().filter(|u| u.user_id == user.id);
            let assigned = all_tasks.iter().filter(|t| t.assigned_to == user.id);
            ActivityRow {
                name: user.full_name.clone(),
                email: user.email.clone(),
                role: user.role.to_string(),
                team: user.team.clone().unwrap_or_default(),
                status: user.status.to_string(),
                updates_submitted: mine.clone().count(),
                last_update: mine.map(|u| u.date).max(),
                open_tasks: assigned.clone().filter(|t| t.status.is_active()).count(),
                completed_tasks: assigned
                    .filter(|t| t.status == TaskStatus::Completed)
                    .count(),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rows)
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Convert the activity report to CSV
///
/// The first line holds the column headers. Fields containing commas, quotes
/// or newlines are quoted and inner quotes doubled.
///
/// # Arguments
/// * `rows` - Report rows from [`activity_rows`]
///
/// # Returns
/// * `String` - CSV content, one line per row
pub fn to_csv(rows: &[ActivityRow]) -> String {
    let mut csv_content = HEADERS.join(",");
    csv_content.push('\n');

    for row in rows {
        let line: Vec<String> = row.cells().iter().map(|c| escape_csv(c)).collect();
        csv_content.push_str(&line.join(","));
        csv_content.push('\n');
    }

    csv_content
}

/// Convert the activity report to an XLSX workbook
///
/// # Arguments
/// * `rows` - Report rows from [`activity_rows`]
///
/// # Returns
/// * `Result<Vec<u8>>` - Workbook bytes with a bold header row
///
/// # Errors
/// * `Internal` if the workbook cannot be written
pub fn to_xlsx(rows: &[ActivityRow]) -> Result<Vec<u8>> {
    build_xlsx(rows).map_err(|e| AppError::internal(format!("xlsx export failed: {}", e)))
}

fn build_xlsx(rows: &[ActivityRow]) -> std::result::Result<Vec<u8>, rust_xlsxwriter::XlsxError> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name("Activity")?;

    let bold = Format::new().set_bold();
    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        worksheet.write_string(r, 0, row.name.as_str())?;
        worksheet.write_string(r, 1, row.email.as_str())?;
        worksheet.write_string(r, 2, row.role.as_str())?;
        worksheet.write_string(r, 3, row.team.as_str())?;
        worksheet.write_string(r, 4, row.status.as_str())?;
        worksheet.write_number(r, 5, row.updates_submitted as f64)?;
        if let Some(date) = row.last_update {
            worksheet.write_string(r, 6, date.to_string().as_str())?;
        }
        worksheet.write_number(r, 7, row.open_tasks as f64)?;
        worksheet.write_number(r, 8, row.completed_tasks as f64)?;
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> ActivityRow {
        ActivityRow {
            name: name.into(),
            email: "a@b.co".into(),
            role: "employee".into(),
            team: "Ops".into(),
            status: "active".into(),
            updates_submitted: 2,
            last_update: NaiveDate::from_ymd_opt(2024, 3, 1),
            open_tasks: 1,
            completed_tasks: 0,
        }
    }

    #[test]
    fn csv_quotes_awkward_fields() {
        let csv = to_csv(&[row("Doe, \"JD\" John")]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), HEADERS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "\"Doe, \"\"JD\"\" John\",a@b.co,employee,Ops,active,2,2024-03-01,1,0"
        );
    }

    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = to_xlsx(&[row("Ann")]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
