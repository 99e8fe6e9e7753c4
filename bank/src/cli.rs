//! Command-line arguments of the node binary.

use {
    crate::error::{BankError, Result},
    clap::{App, Arg, ArgMatches},
    std::path::PathBuf,
};

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeArgs {
    pub node_id: String,
    pub port: u16,
    pub config_path: PathBuf,
    pub log_filter: String,
    /// Override of the dial retry interval.
    pub retry_interval_ms: Option<u64>,
}

fn is_port(value: String) -> std::result::Result<(), String> {
    value
        .parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("port should be a number in 0..=65535, received {value}"))
}

fn is_millis(value: String) -> std::result::Result<(), String> {
    value
        .parse::<u64>()
        .map(|_| ())
        .map_err(|_| format!("expected milliseconds, received {value}"))
}

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("groupcast-node")
        .about(
            "Read transaction events from standard input and apply them, in one \
             group-wide order, on every node of the group",
        )
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::with_name("node_id")
                .index(1)
                .value_name("NODE_ID")
                .required(true)
                .help("Identity of this node, as listed in the node table"),
        )
        .arg(
            Arg::with_name("port")
                .index(2)
                .value_name("PORT")
                .required(true)
                .validator(is_port)
                .help("Port to accept group connections on"),
        )
        .arg(
            Arg::with_name("config_path")
                .index(3)
                .value_name("CONFIG")
                .required(true)
                .help("Path of the node table"),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .value_name("FILTER")
                .takes_value(true)
                .default_value(DEFAULT_LOG_FILTER)
                .help("Default log filter; RUST_LOG takes precedence"),
        )
        .arg(
            Arg::with_name("retry_interval_ms")
                .long("retry-interval-ms")
                .value_name("MILLISECONDS")
                .takes_value(true)
                .validator(is_millis)
                .help("Delay between two dial attempts to the same peer"),
        )
}

impl NodeArgs {
    pub fn from_matches(matches: &ArgMatches<'_>) -> Result<Self> {
        let required = |name: &str| {
            matches
                .value_of(name)
                .ok_or_else(|| BankError::InvalidArgument(format!("missing {name}")))
        };
        let port_raw = required("port")?;
        let port = port_raw
            .parse()
            .map_err(|_| BankError::InvalidArgument(format!("bad port {port_raw}")))?;
        let retry_interval_ms = matches
            .value_of("retry_interval_ms")
            .map(|raw| {
                raw.parse().map_err(|_| {
                    BankError::InvalidArgument(format!("bad retry interval {raw}"))
                })
            })
            .transpose()?;

        Ok(Self {
            node_id: required("node_id")?.to_string(),
            port,
            config_path: PathBuf::from(required("config_path")?),
            log_filter: matches
                .value_of("log")
                .unwrap_or(DEFAULT_LOG_FILTER)
                .to_string(),
            retry_interval_ms,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
