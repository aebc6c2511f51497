use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow};
use clap::{Arg, ArgMatches, Command};
use serde_json::Value;
use tether_client::SessionConfig;

pub fn command() -> Command {
    Command::new("tether")
        .version("0.1.0")
        .about("Reconnecting event session client")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Session config file (TOML)"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .value_name("URL")
                .help("Server base URL, overrides the config file"),
        )
        .arg(
            Arg::new("namespace")
                .long("namespace")
                .value_name("NS")
                .help("Namespace appended to the base URL"),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .value_name("TOKEN")
                .help("Bearer credential, defaults to $TETHER_TOKEN"),
        )
        .arg(
            Arg::new("send")
                .long("send")
                .value_name("EVENT")
                .requires("payload")
                .help("Event to send once connected"),
        )
        .arg(
            Arg::new("payload")
                .long("payload")
                .value_name("JSON")
                .requires("send")
                .help("JSON payload of the event given with --send"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(clap::ArgAction::Count)
                .help("Set verbose output level"),
        )
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub url: Option<String>,
    pub namespace: Option<String>,
    pub token: Option<String>,
    pub send: Option<(String, Value)>,
    pub verbose: u8,
}

impl CliOptions {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let send = match (
            matches.get_one::<String>("send"),
            matches.get_one::<String>("payload"),
        ) {
            (Some(event), Some(payload)) => {
                let payload = serde_json::from_str(payload)
                    .with_context(|| format!("Invalid JSON payload for {event}"))?;
                Some((event.clone(), payload))
            }
            _ => None,
        };

        Ok(Self {
            config: matches.get_one::<PathBuf>("config").cloned(),
            url: matches.get_one::<String>("url").cloned(),
            namespace: matches.get_one::<String>("namespace").cloned(),
            token: matches.get_one::<String>("token").cloned(),
            send,
            verbose: matches.get_count("verbose"),
        })
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Config file (if any) with the command line applied on top
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match (&self.config, &self.url) {
            (Some(path), _) => SessionConfig::load(path)?,
            (None, Some(url)) => SessionConfig::new(url.clone()),
            (None, None) => return Err(anyhow!("Either --config or --url is required")),
        };

        if let Some(url) = &self.url {
            config.base_url.clone_from(url);
        }
        if let Some(namespace) = &self.namespace {
            config.policy.namespace.clone_from(namespace);
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        let matches = command().try_get_matches_from(args)?;
        CliOptions::from_matches(&matches)
    }

    #[test]
    fn test_url_and_overrides() {
        let options = parse(&[
            "tether",
            "--url",
            "http://localhost:8080",
            "--namespace",
            "/chat",
            "--token",
            "abc",
            "-vv",
        ])
        .unwrap();

        assert_eq!(options.log_level(), log::LevelFilter::Trace);
        let config = options.session_config().unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.policy.namespace, "/chat");
        assert_eq!(config.credential(), Some("abc".to_owned()));
    }

    #[test]
    fn test_send_requires_payload() {
        assert!(parse(&["tether", "--url", "http://x", "--send", "ping"]).is_err());

        let options = parse(&[
            "tether",
            "--url",
            "http://x",
            "--send",
            "ping",
            "--payload",
            r#"{"n": 1}"#,
        ])
        .unwrap();
        assert_eq!(options.send, Some(("ping".to_owned(), json!({"n": 1}))));
        assert_eq!(options.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn test_bad_payload() {
        let err = parse(&["tether", "--url", "http://x", "--send", "ping", "--payload", "{"])
            .unwrap_err();
        assert!(err.to_string().contains("Invalid JSON payload"));
    }

    #[test]
    fn test_needs_config_or_url() {
        let options = parse(&["tether"]).unwrap();
        assert!(options.session_config().is_err());
    }
}
