mod remote;
mod run;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Bot")
        .command("run", "Start the bot, its scheduler and the observer server")
        .blank()
        .text("--config <path>   Config file (default: ~/.pollbot/pollbot.toml)")
        .text("--host <addr>     Observer server host")
        .text("--port <port>     Observer server port")
        .text("--verbose         Debug logging")
        .print();

    GuideSection::new("Running bot")
        .command("status", "Show connection state and schedule")
        .command("logs", "Print the recent log history")
        .command("test-poll", "Send a test poll now")
        .command("restart", "Restart the bot process")
        .command("groups", "List group chats (--name <group> to look one up)")
        .blank()
        .text("--api-url <url>   Observer server URL (default: from config)")
        .text("--token <token>   API token for test-poll and restart")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("pollbot").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunFlags {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub verbose: bool,
}

pub(crate) fn parse_run_flags(args: &[String], start: usize) -> RunFlags {
    let mut flags = RunFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    flags.host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    flags.port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    flags
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RemoteFlags {
    pub config: Option<PathBuf>,
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub name: Option<String>,
}

pub(crate) fn parse_remote_flags(args: &[String], start: usize) -> RemoteFlags {
    let mut flags = RemoteFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-url" => {
                if i + 1 < args.len() {
                    flags.api_url = Some(args[i + 1].trim_end_matches('/').to_string());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--token" => {
                if i + 1 < args.len() {
                    flags.token = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--name" | "-n" => {
                if i + 1 < args.len() {
                    flags.name = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flags
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    match cmd {
        "run" => run::run_bot(parse_run_flags(&args, 2)).await,
        "status" => remote::show_status(&parse_remote_flags(&args, 2)).await,
        "logs" => remote::show_logs(&parse_remote_flags(&args, 2)).await,
        "test-poll" => remote::send_test_poll(&parse_remote_flags(&args, 2)).await,
        "restart" => remote::restart(&parse_remote_flags(&args, 2)).await,
        "groups" => remote::list_groups(&parse_remote_flags(&args, 2)).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_remote_flags, parse_run_flags};
    use std::path::PathBuf;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_run_flags_reads_everything() {
        let args = args(&[
            "pollbot",
            "run",
            "--config",
            "/etc/pollbot.toml",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--verbose",
        ]);
        let flags = parse_run_flags(&args, 2);
        assert_eq!(flags.config, Some(PathBuf::from("/etc/pollbot.toml")));
        assert_eq!(flags.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(flags.port, Some(9000));
        assert!(flags.verbose);
    }

    #[test]
    fn parse_run_flags_ignores_bad_port_and_dangling_flag() {
        let args = args(&["pollbot", "run", "--port", "not-a-port", "--host"]);
        let flags = parse_run_flags(&args, 2);
        assert_eq!(flags.port, None);
        assert_eq!(flags.host, None);
    }

    #[test]
    fn parse_remote_flags_reads_url_token_and_name() {
        let args = args(&[
            "pollbot",
            "groups",
            "--api-url",
            "http://10.0.0.5:8080/",
            "--token",
            "s3cret",
            "--name",
            "Family",
        ]);
        let flags = parse_remote_flags(&args, 2);
        assert_eq!(flags.api_url.as_deref(), Some("http://10.0.0.5:8080"));
        assert_eq!(flags.token.as_deref(), Some("s3cret"));
        assert_eq!(flags.name.as_deref(), Some("Family"));
    }
}
