use anyhow::Context;
use sqlx::PgPool;

/// Export task data as CSV.
pub async fn run_export_csv(
    pool: &PgPool,
    project_id: Option<&str>,
    output: Option<&str>,
) -> anyhow::Result<()> {
    use std::io::Write;

    let project_id = project_id
        .map(crate::resolve::resolve_project_id)
        .transpose()?;

    let rows = if let Some(pid) = project_id {
        sqlx::query_as::<_, TaskRow>(
            "SELECT t.id, t.project_id, t.title, t.status, t.attempt, t.created_at
             FROM tasks t WHERE t.project_id = $1 ORDER BY t.created_at",
        )
        .bind(pid)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as::<_, TaskRow>(
            "SELECT t.id, t.project_id, t.title, t.status, t.attempt, t.created_at
             FROM tasks t ORDER BY t.project_id, t.created_at",
        )
        .fetch_all(pool)
        .await?
    };

    let mut writer: Box<dyn Write> = if let Some(path) = output {
        Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("cannot create output file: {path}"))?,
        )
    } else {
        Box::new(std::io::stdout().lock())
    };

    writeln!(writer, "id,project_id,title,status,attempt,created_at")?;

    for row in &rows {
        writeln!(
            writer,
            "{},{},{},{},{},{}",
            row.id, row.project_id, row.title, row.status, row.attempt, row.created_at,
        )?;
    }

    if let Some(path) = output {
        println!("Exported {} rows to {path}", rows.len());
    }

    Ok(())
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: uuid::Uuid,
    project_id: uuid::Uuid,
    title: String,
    status: String,
    attempt: i32,
    created_at: chrono::DateTime<chrono::Utc>,
}
