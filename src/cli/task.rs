//! tasknote task command implementations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::ListOptions;
use crate::cli::{Context, TaskFieldArgs};
use crate::error::{Error, Result};
use crate::expression::{and, parse_condition, Clause, Compare, Schema};
use crate::note::Note;
use crate::output::{emit_success, HumanOutput};
use crate::task::Task;

pub struct ListArgs {
    pub condition: Option<String>,
    pub all: bool,
    pub order_by: Option<String>,
    pub desc: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
struct TaskNotedOutput<'a> {
    task: &'a Task,
    version: &'a str,
    previous: Option<&'a str>,
}

#[derive(Serialize)]
struct TaskShowOutput<'a> {
    task: &'a Task,
    head: Option<&'a Note>,
}

#[derive(Serialize)]
struct TaskListOutput<'a> {
    total: usize,
    tasks: &'a [Task],
}

pub async fn run_add(ctx: &Context, title: String, fields: TaskFieldArgs) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidArgument("title cannot be empty".to_string()));
    }

    let mut task = Task::new(title);
    if let Some(by) = fields.by.as_deref() {
        task.create_by = by.to_string();
        task.update_by = by.to_string();
    }
    apply_fields(&mut task, fields)?;

    let note = ctx.trigger.create(task).await?;
    emit_noted(ctx, "task add", "Task created", &note)
}

pub async fn run_update(
    ctx: &Context,
    id: String,
    title: Option<String>,
    fields: TaskFieldArgs,
) -> Result<()> {
    let mut task = load_task(ctx, &id).await?;
    if let Some(title) = title {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("title cannot be empty".to_string()));
        }
        task.title = title.to_string();
    }
    let by = fields.by.clone();
    apply_fields(&mut task, fields)?;
    task.touch(by.as_deref());

    let note = ctx.trigger.update(task).await?;
    emit_noted(ctx, "task update", "Task updated", &note)
}

pub async fn run_delete(ctx: &Context, id: String, by: Option<String>) -> Result<()> {
    let mut task = load_task(ctx, &id).await?;
    if let Some(by) = by {
        task.update_by = by;
    }
    let note = ctx.trigger.delete(task).await?;
    emit_noted(ctx, "task delete", "Task deactivated", &note)
}

pub async fn run_show(ctx: &Context, id: String) -> Result<()> {
    let task = load_task(ctx, &id).await?;
    let head = ctx.manager().get_current_note_by_task(&task.task_id).await?;

    let mut human = HumanOutput::new(format!("Task {}", task.task_id));
    task_fields(&mut human, &task);
    match &head {
        Some(note) => human.field("Head note", note.version.clone()),
        None => human.warning("task has no notes; run `tasknote watch --once`"),
    }

    emit_success(
        ctx.output,
        "task show",
        &TaskShowOutput {
            task: &task,
            head: head.as_ref(),
        },
        Some(&human),
    )
}

pub async fn run_list(ctx: &Context, args: ListArgs) -> Result<()> {
    let fields = Task::FIELDS;
    let mut clauses: Vec<Clause> = Vec::new();
    if !args.all {
        clauses.push(fields.active.clone().equals(true).into());
    }
    if let Some(raw) = args.condition.as_deref() {
        clauses.push(parse_condition(raw, &fields)?);
    }
    let condition: Clause = and(clauses).into();

    let mut options = ListOptions::new().desc(args.desc);
    if let Some(name) = args.order_by.as_deref() {
        let variable = fields
            .lookup(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown field '{name}'")))?;
        options = options.order_by(variable);
    }
    if let Some(limit) = args.limit {
        options = options.limit(limit);
    }
    if let Some(offset) = args.offset {
        options = options.offset(offset);
    }

    let tasks = ctx.manager().get_tasks(&condition, &options).await?;

    let mut human = HumanOutput::new("Tasks");
    human.field("Total", tasks.len().to_string());
    if let Some(raw) = args.condition {
        human.field("Where", raw);
    }
    for task in &tasks {
        human.row(task_line(task));
    }

    emit_success(
        ctx.output,
        "task list",
        &TaskListOutput {
            total: tasks.len(),
            tasks: &tasks,
        },
        Some(&human),
    )
}

async fn load_task(ctx: &Context, id: &str) -> Result<Task> {
    ctx.manager()
        .get_task_by_id(id)
        .await?
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))
}

fn emit_noted(ctx: &Context, command: &str, header: &str, note: &Note) -> Result<()> {
    let mut human = HumanOutput::new(header);
    task_fields(&mut human, &note.task);
    human.field("Version", note.version.clone());
    if let Some(previous) = &note.previous {
        human.field("Previous", previous.clone());
    }

    emit_success(
        ctx.output,
        command,
        &TaskNotedOutput {
            task: &note.task,
            version: &note.version,
            previous: note.previous.as_deref(),
        },
        Some(&human),
    )
}

pub(crate) fn task_fields(human: &mut HumanOutput, task: &Task) {
    human.field("ID", task.task_id.clone());
    human.field("Title", task.title.clone());
    human.field("Status", task.status.clone());
    if !task.content.is_empty() {
        human.field("Content", task.content.clone());
    }
    if !task.tags.is_empty() {
        human.field("Tags", task.tags.join(", "));
    }
    if let Some(due) = task.due_date {
        human.field("Due", due.to_rfc3339());
    }
    human.field("Percent", task.percent.to_string());
    if task.is_done {
        human.field("Done", "");
    }
    if !task.active {
        human.field("Inactive", "");
    }
    human.field("Updated", task.update_time.to_rfc3339());
}

fn task_line(task: &Task) -> String {
    let mut line = format!("[{}] {} {}", task.status, task.task_id, task.title);
    if task.is_done {
        line.push_str(" (done)");
    }
    if !task.active {
        line.push_str(" (inactive)");
    }
    line
}

fn apply_fields(task: &mut Task, fields: TaskFieldArgs) -> Result<()> {
    if let Some(content) = fields.content {
        task.content = content;
    }
    if let Some(status) = fields.status {
        let status = status.trim();
        if status.is_empty() {
            return Err(Error::InvalidArgument("status cannot be empty".to_string()));
        }
        task.status = status.to_string();
    }
    if !fields.tags.is_empty() {
        task.tags = fields.tags;
    }
    if let Some(due) = fields.due.as_deref() {
        task.due_date = Some(parse_time("due", due)?);
    }
    if let Some(start) = fields.start.as_deref() {
        task.start_date = Some(parse_time("start", start)?);
    }
    if let Some(percent) = fields.percent {
        if percent > 100 {
            return Err(Error::InvalidArgument(format!(
                "percent must be 0-100, got {percent}"
            )));
        }
        task.percent = percent;
    }
    if let Some(done) = fields.done {
        task.is_done = done;
    }
    for raw in &fields.extras {
        let (key, value) = parse_extra(raw)?;
        task.extras.insert(key, value);
    }
    Ok(())
}

fn parse_time(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| Error::InvalidArgument(format!("{name}: invalid RFC 3339 time '{raw}': {err}")))
}

/// `key=value`; the value is JSON when it parses as JSON, a string otherwise.
fn parse_extra(raw: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| Error::InvalidArgument(format!("extra '{raw}' must be key=value")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidArgument(format!("extra '{raw}' has an empty key")));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extras_parse_json_or_string() {
        assert_eq!(
            parse_extra("points=3").unwrap(),
            ("points".to_string(), serde_json::json!(3))
        );
        assert_eq!(
            parse_extra("owner=ana").unwrap(),
            ("owner".to_string(), serde_json::json!("ana"))
        );
        assert!(parse_extra("novalue").is_err());
        assert!(parse_extra("=1").is_err());
    }

    #[test]
    fn fields_apply_to_task() {
        let mut task = Task::new("a");
        apply_fields(
            &mut task,
            TaskFieldArgs {
                status: Some("doing".to_string()),
                tags: vec!["x".to_string()],
                due: Some("2024-05-01T00:00:00Z".to_string()),
                percent: Some(40),
                done: Some(true),
                ..TaskFieldArgs::default()
            },
        )
        .unwrap();
        assert_eq!(task.status, "doing");
        assert_eq!(task.tags, vec!["x".to_string()]);
        assert!(task.due_date.is_some());
        assert_eq!(task.percent, 40);
        assert!(task.is_done);
    }

    #[test]
    fn percent_over_hundred_rejected() {
        let mut task = Task::new("a");
        let result = apply_fields(
            &mut task,
            TaskFieldArgs {
                percent: Some(101),
                ..TaskFieldArgs::default()
            },
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
