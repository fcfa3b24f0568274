use anyhow::Result;
use console::style;
use serde_json::Value;

use super::RemoteFlags;
use crate::core::config::BotConfig;
use crate::core::terminal::{print_error, print_info, print_status, print_success, print_warn};

/// Talks to the observer server of a running bot.
struct Remote {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl Remote {
    async fn from_flags(flags: &RemoteFlags) -> Result<Self> {
        let config = BotConfig::load(flags.config.as_deref()).await?;
        let api_url = flags
            .api_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", config.bind_addr()));
        Ok(Self {
            client: reqwest::Client::new(),
            api_url,
            token: flags.token.clone().or(config.api_token),
        })
    }

    /// `None` when the bot could not be reached; the failure is already printed.
    async fn get(&self, path: &str) -> Option<Value> {
        let url = format!("{}{}", self.api_url, path);
        self.finish(self.client.get(&url).send().await).await
    }

    async fn post(&self, path: &str) -> Option<Value> {
        let url = format!("{}{}", self.api_url, path);
        let mut req = self.client.post(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        self.finish(req.send().await).await
    }

    async fn finish(&self, sent: reqwest::Result<reqwest::Response>) -> Option<Value> {
        match sent {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(body) => Some(body),
                Err(e) => {
                    print_error(&format!("Unexpected response from bot: {}", e));
                    None
                }
            },
            Err(_) => {
                print_error(&format!(
                    "Could not reach the bot at {}. Is it running?",
                    self.api_url
                ));
                None
            }
        }
    }
}

fn succeeded(body: &Value) -> bool {
    body.get("success").and_then(|v| v.as_bool()) == Some(true)
}

fn error_of(body: &Value) -> &str {
    body.get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown error")
}

/// Human-readable connection state, e.g. `failed (bridge crashed)`.
fn describe_state(state: &Value) -> String {
    let name = state
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .replace('_', " ");
    match state.get("detail").and_then(|v| v.as_str()) {
        Some(detail) => format!("{} ({})", name, detail),
        None => name,
    }
}

fn field<'a>(status: &'a Value, key: &str) -> &'a str {
    status.get(key).and_then(|v| v.as_str()).unwrap_or("-")
}

pub async fn show_status(flags: &RemoteFlags) -> Result<()> {
    let remote = Remote::from_flags(flags).await?;
    let Some(body) = remote.get("/api/status").await else {
        return Ok(());
    };
    if !succeeded(&body) {
        print_error(error_of(&body));
        return Ok(());
    }

    let status = &body["status"];
    println!();
    print_status("State", &describe_state(&status["state"]));
    print_status(
        "Session",
        if status["session_exists"].as_bool() == Some(true) {
            "stored"
        } else {
            "none"
        },
    );
    print_status("Schedule", field(status, "schedule"));
    print_status("Next poll", field(status, "next_poll_at"));
    print_status("Last poll", field(status, "last_poll_sent_at"));
    if let Some(err) = status.get("last_error").and_then(|v| v.as_str()) {
        print_warn(&format!("Last error: {}", err));
    }
    if status["awaiting_qr"].as_bool() == Some(true) {
        print_info("Waiting for a QR scan. Open /api/events or the bot's terminal to scan it.");
    }
    println!();
    Ok(())
}

pub async fn show_logs(flags: &RemoteFlags) -> Result<()> {
    let remote = Remote::from_flags(flags).await?;
    let Some(body) = remote.get("/api/logs").await else {
        return Ok(());
    };
    if !succeeded(&body) {
        print_error(error_of(&body));
        return Ok(());
    }

    let logs = body["logs"].as_array().cloned().unwrap_or_default();
    if logs.is_empty() {
        println!("  No log lines yet.");
    }
    for entry in logs {
        if let Some(line) = entry.get("line").and_then(|v| v.as_str()) {
            println!("{}", line);
        }
    }
    Ok(())
}

pub async fn send_test_poll(flags: &RemoteFlags) -> Result<()> {
    let remote = Remote::from_flags(flags).await?;
    let Some(body) = remote.post("/api/poll/test").await else {
        return Ok(());
    };
    if succeeded(&body) {
        print_success("Test poll sent.");
        return Ok(());
    }

    let outcome = &body["outcome"];
    match outcome.get("status").and_then(|v| v.as_str()) {
        Some("not_ready") => print_warn(&format!(
            "Bot is not ready yet (state: {}).",
            field(outcome, "state")
        )),
        Some("busy") => print_warn("Another poll is being sent right now. Try again shortly."),
        Some("failed") => print_error(&format!("Test poll failed: {}", field(outcome, "error"))),
        _ => print_error(error_of(&body)),
    }
    Ok(())
}

pub async fn restart(flags: &RemoteFlags) -> Result<()> {
    let remote = Remote::from_flags(flags).await?;
    let Some(body) = remote.post("/api/restart").await else {
        return Ok(());
    };
    if succeeded(&body) {
        print_success("Bot is restarting.");
    } else {
        print_error(error_of(&body));
    }
    Ok(())
}

pub async fn list_groups(flags: &RemoteFlags) -> Result<()> {
    let remote = Remote::from_flags(flags).await?;
    let path = match &flags.name {
        Some(name) => format!("/api/groups?name={}", urlencoding::encode(name)),
        None => "/api/groups".to_string(),
    };
    let Some(body) = remote.get(&path).await else {
        return Ok(());
    };
    if !succeeded(&body) {
        print_error(error_of(&body));
        return Ok(());
    }

    let groups = body["groups"].as_array().cloned().unwrap_or_default();
    if groups.is_empty() {
        match &flags.name {
            Some(name) => print_warn(&format!("No group named '{}' found.", name)),
            None => println!("  The account is not in any groups."),
        }
        return Ok(());
    }

    println!();
    for group in &groups {
        println!(
            "  {}  {}",
            style(field(group, "name")).bold(),
            style(field(group, "id")).dim()
        );
    }
    println!();
    if flags.name.is_some() {
        print_info("Put the id above into group_id in pollbot.toml.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn describe_state_includes_detail() {
        assert_eq!(describe_state(&json!({ "name": "ready" })), "ready");
        assert_eq!(
            describe_state(&json!({ "name": "awaiting_qr_scan" })),
            "awaiting qr scan"
        );
        assert_eq!(
            describe_state(&json!({ "name": "failed", "detail": "auth failure" })),
            "failed (auth failure)"
        );
    }

    #[test]
    fn success_and_error_fields() {
        assert!(succeeded(&json!({ "success": true })));
        assert!(!succeeded(&json!({ "success": "yes" })));
        assert_eq!(error_of(&json!({ "error": "nope" })), "nope");
        assert_eq!(error_of(&json!({})), "Unknown error");
    }
}
