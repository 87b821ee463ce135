//! Line-oriented sign-in form.
//!
//! Mounts a [`RateLimitGuard`] for the configured action, submits every
//! attempt through it, and renders the lockout countdown from the guard's
//! snapshots while the form is disabled.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use cherut_core::Severity;
use cherut_core::presenter::format_countdown;
use cherut_infra::{GuardConfig, GuardError, RateLimitGuard};

use crate::authenticator::Session;
use crate::state::AppState;

const METER_WIDTH: usize = 20;

/// How the form was left.
#[derive(Debug)]
pub enum Outcome {
    SignedIn(Session),
    Closed,
}

/// Run the form until a sign-in succeeds or input ends.
pub async fn run<R, W>(state: &AppState, input: R, out: &mut W) -> anyhow::Result<Outcome>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let limiter = state.limiter().await?;
    tracing::debug!(
        action = %limiter.action(),
        client_id = %limiter.client_id(),
        "Mounting sign-in form"
    );

    let guard = RateLimitGuard::mount(limiter, GuardConfig::default());
    guard.refresh().await;

    let mut lines = input.lines();
    writeln!(out, "Sign in ({}), demo account {}", state.action, state.authenticator.email())?;

    loop {
        let snapshot = guard.snapshot();
        if snapshot.is_locked {
            wait_out_lockout(&guard, out).await?;
            continue;
        }
        if snapshot.severity == Severity::Warning {
            writeln!(out, "! {}", snapshot.warning_message)?;
        }

        let Some(email) = prompt(&mut lines, out, "Email: ").await? else {
            return Ok(Outcome::Closed);
        };
        let Some(password) = prompt(&mut lines, out, "Password: ").await? else {
            return Ok(Outcome::Closed);
        };

        match guard
            .handle_attempt(|| state.authenticator.sign_in(&email, &password))
            .await
        {
            Ok(session) => {
                writeln!(out, "Signed in as {}", session.email)?;
                return Ok(Outcome::SignedIn(session));
            }
            Err(GuardError::Blocked { message, .. }) => writeln!(out, "{message}")?,
            Err(GuardError::Operation(e)) => writeln!(out, "Sign-in failed: {e}")?,
        }
    }
}

async fn prompt<R, W>(lines: &mut Lines<R>, out: &mut W, label: &str) -> anyhow::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    write!(out, "{label}")?;
    out.flush()?;
    Ok(lines.next_line().await?)
}

/// Redraw the countdown on every published snapshot until the lockout ends.
async fn wait_out_lockout<W: Write>(guard: &RateLimitGuard, out: &mut W) -> anyhow::Result<()> {
    let mut rx = guard.subscribe();
    writeln!(out, "{}", guard.warning_message())?;

    loop {
        let snapshot = rx.borrow_and_update().clone();
        if !snapshot.is_locked {
            break;
        }

        write!(
            out,
            "\r  {} {}",
            format_countdown(snapshot.lockout_time_remaining),
            meter(snapshot.progress)
        )?;
        out.flush()?;

        if rx.changed().await.is_err() {
            break;
        }
    }

    writeln!(out, "\r  You can try again now.")?;
    Ok(())
}

fn meter(progress: f64) -> String {
    let filled = ((progress.clamp(0.0, 1.0) * METER_WIDTH as f64).round()) as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(METER_WIDTH - filled))
}
