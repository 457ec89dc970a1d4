//! Interactive reproduction menu.
//!
//! Option 2 followed by any number of 3s and then 1 shows the defect: the
//! deleted session is never pinged because every checkout counts as
//! activity.

use anyhow::{Context, Result};
use common::logger::{TraceId, child_span, root_span};
use common::time::format_ms;
use pool::{Pool, RemoteService};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{Instrument, info};

pub const MENU: &str = "What do you want to do?\n\
1-Execute query\n\
2-Delete session server side\n\
3-Desperately try to ping the pool yourself\n\
4-Show pool status\n\
q-Quit\n";

const QUERY: &str = "SELECT 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ExecuteQuery,
    DeleteSession,
    PingPool,
    Status,
    Quit,
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Command::ExecuteQuery),
            "2" => Some(Command::DeleteSession),
            "3" => Some(Command::PingPool),
            "4" => Some(Command::Status),
            "q" | "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Command::ExecuteQuery => "execute_query",
            Command::DeleteSession => "delete_session",
            Command::PingPool => "ping_pool",
            Command::Status => "status",
            Command::Quit => "quit",
        }
    }
}

/// Reads commands line by line until `q` or end of input.
pub async fn run<R, W>(
    pool: &Pool,
    remote: &dyn RemoteService,
    input: R,
    mut out: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();

    loop {
        out.write_all(MENU.as_bytes()).await?;
        out.flush().await?;

        let Some(line) = lines.next_line().await.context("failed to read command")? else {
            info!("input closed");
            return Ok(());
        };

        let Some(cmd) = Command::parse(&line) else {
            out.write_all(b"please enter 1, 2, 3, 4 or q\n\n").await?;
            continue;
        };
        if cmd == Command::Quit {
            return Ok(());
        }

        let trace_id = TraceId::new();
        let text = dispatch(cmd, pool, remote)
            .instrument(root_span(cmd.name(), &trace_id))
            .await;

        out.write_all(format!("\n{text}\n\n").as_bytes()).await?;
    }
}

pub async fn dispatch(cmd: Command, pool: &Pool, remote: &dyn RemoteService) -> String {
    match cmd {
        Command::ExecuteQuery => execute_query(pool).await,
        Command::DeleteSession => delete_session(pool, remote).await,
        Command::PingPool => ping_pool(pool).await,
        Command::Status => status(pool),
        Command::Quit => String::new(),
    }
}

/// Runs a query through the pool. Under the default freshness policy the
/// checkout refreshes the session's activity even if the query fails.
async fn execute_query(pool: &Pool) -> String {
    match pool.execute(QUERY).await {
        Ok(rows) => format!("Query executed successfully ({rows} row)"),
        Err(e) => format!("Query failed\n{e}"),
    }
}

/// Deletes the pooled session on the backend without evicting it.
async fn delete_session(pool: &Pool, remote: &dyn RemoteService) -> String {
    let session = match pool.acquire().await {
        Ok(s) => s,
        Err(e) => return format!("Could not check out a session\n{e}"),
    };
    let session_id = session.session_id().to_string();
    pool.release(session).await;

    if let Err(e) = pool
        .force_invalidate(&session_id)
        .instrument(child_span("force_invalidate"))
        .await
    {
        return format!("Delete of session {session_id} failed\n{e}");
    }

    match remote
        .exists(&session_id)
        .instrument(child_span("confirm_deleted"))
        .await
    {
        Ok(false) => format!("session with id {session_id} successfully deleted"),
        Ok(true) => format!("session with id {session_id} still exists after delete"),
        Err(e) => format!("session {session_id} deleted, existence check failed\n{e}"),
    }
}

/// One maintenance pass. Fresh sessions are skipped, dead or not.
async fn ping_pool(pool: &Pool) -> String {
    let report = pool.maintain().await;
    format!(
        "Pool pinged successfully (pinged={}, recreated={}, skipped={}, failed={})",
        report.pinged, report.recreated, report.skipped, report.failed
    )
}

fn status(pool: &Pool) -> String {
    let status = pool.status();
    let mut text = format!(
        "capacity={} available={} checked_out={} in_maintenance={}",
        status.capacity, status.available, status.checked_out, status.in_maintenance
    );
    for s in &status.sessions {
        text.push_str(&format!(
            "\n  {} created={} last_activity={} valid={} ({:?})",
            s.session_id,
            format_ms(s.created_ms),
            format_ms(s.last_activity_ms),
            s.valid,
            s.location
        ));
    }
    text
}
