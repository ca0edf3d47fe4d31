//! Command line options and the per-invocation configuration built from
//! them.

use clap::{ArgAction, Parser};

pub const DEFAULT_EXPIRES: i64 = 3600;
pub const DEFAULT_RTP_PORT: u16 = 4000;
pub const DEFAULT_CODECS: &str = "g711";
/// info
pub const DEFAULT_VERBOSITY: u8 = 3;
pub const MAX_VERBOSITY: u8 = 6;

const COMMANDS_HELP: &str = "\
Commands (default is PING):
  PING       Send OPTIONS to the destination.
  PUBLISH    Publish presence status. Default document is pidf, event is presence.
  SUBSCRIBE  Send SUBSCRIBE. Default event is presence.
  NOTIFY     Send NOTIFY outside a subscription. Default event is keep-alive.
  REGISTER   List, register or unregister contacts of an AOR.
  REFER      Click-to-dial REFER outside a dialog. Requires --to.
  MESSAGE    Send an instant message with --body.
  INVITE     Establish a call and hang up with BYE once it is confirmed.";

#[derive(Debug, Parser)]
#[command(
    name = "sippak",
    about = "SIP command line utility",
    override_usage = "sippak [COMMAND] [OPTIONS] [DESTINATION]",
    after_help = COMMANDS_HELP,
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Print this usage message and exit
    #[arg(short = 'h', long)]
    pub help: bool,

    /// Print version and exit
    #[arg(short = 'V', long)]
    pub version: bool,

    /// Increase verbosity, can be repeated
    #[arg(short = 'v', action = ArgAction::Count)]
    pub verbose_count: u8,

    /// Increase verbosity by N (default 1)
    #[arg(
        long = "verbose",
        value_name = "N",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "1"
    )]
    pub verbose_level: Option<u8>,

    /// Mute all output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Comma separated name servers, host[:port]
    #[arg(long = "ns", value_name = "LIST")]
    pub nameservers: Option<String>,

    /// Colorized output
    #[arg(long)]
    pub color: bool,

    /// Print a trailing '.' at the end of each SIP message line
    #[arg(long)]
    pub trail_dot: bool,

    /// Print time with microseconds in logs
    #[arg(long)]
    pub log_time: bool,

    /// Print log level
    #[arg(long)]
    pub log_level: bool,

    /// Print log sender module
    #[arg(long)]
    pub log_snd: bool,

    #[arg(short = 'P', long, value_name = "PORT", default_value_t = 0)]
    pub local_port: u16,

    #[arg(short = 'l', long, value_name = "HOST")]
    pub local_host: Option<String>,

    /// Authentication user, also used in From and Contact
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    #[arg(short = 'p', long, env = "SIPPAK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Contact URI instead of the generated one
    #[arg(short = 'c', long)]
    pub contact: Option<String>,

    /// Display name in From
    #[arg(short = 'F', long, value_name = "DISPLAY_NAME")]
    pub from_name: Option<String>,

    /// Transport protocol
    #[arg(short = 't', long = "proto", default_value = "udp")]
    pub proto: String,

    #[arg(short = 'X', long, allow_negative_numbers = true, default_value_t = DEFAULT_EXPIRES)]
    pub expires: i64,

    /// Presence status for PUBLISH: open, closed
    #[arg(long)]
    pub pres_status: Option<String>,

    #[arg(long)]
    pub pres_note: Option<String>,

    /// Body type: pidf, xpidf or mwi
    #[arg(short = 'C', long)]
    pub content_type: Option<String>,

    /// Event header; "mwi" is an alias of message-summary
    #[arg(short = 'E', long)]
    pub event: Option<String>,

    /// Voice messages new,old,urgent_new,urgent_old
    #[arg(short = 'M', long = "mwi", value_name = "N,N,N,N")]
    pub mwi: Option<String>,

    /// Voicemail account for the message-summary body
    #[arg(long)]
    pub mwi_acc: Option<String>,

    /// REGISTER: list contacts bound to the AOR
    #[arg(long)]
    pub clist: bool,

    /// REGISTER: remove all bindings of the AOR
    #[arg(long)]
    pub cancel_all: bool,

    /// REGISTER: remove our binding. INVITE: cancel in early state
    #[arg(long)]
    pub cancel: bool,

    /// REFER: Refer-To URI
    #[arg(long)]
    pub to: Option<String>,

    /// MESSAGE: text body
    #[arg(long)]
    pub body: Option<String>,

    /// INVITE codecs: g711, gsm, g722, l16 or all
    #[arg(long, default_value = DEFAULT_CODECS)]
    pub codec: String,

    #[arg(long, default_value_t = DEFAULT_RTP_PORT)]
    pub rtp_port: u16,

    #[arg(short = 'A', long)]
    pub user_agent: Option<String>,

    /// Custom header "Name: value", repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Proxy URI, repeatable. The first one is the outbound proxy
    #[arg(short = 'R', long = "proxy")]
    pub proxies: Vec<String>,

    #[arg(value_name = "COMMAND|DESTINATION", num_args = 0..=2)]
    pub positionals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    Publish,
    Subscribe,
    Notify,
    Register,
    Refer,
    Message,
    Invite,
    Unknown,
    Help,
    Version,
}

impl CommandKind {
    /// Case-insensitive command token. Help and version are flags only.
    pub fn from_token(token: &str) -> Option<Self> {
        let kind = match token.to_ascii_uppercase().as_str() {
            "PING" => CommandKind::Ping,
            "PUBLISH" => CommandKind::Publish,
            "SUBSCRIBE" => CommandKind::Subscribe,
            "NOTIFY" => CommandKind::Notify,
            "REGISTER" => CommandKind::Register,
            "REFER" => CommandKind::Refer,
            "MESSAGE" => CommandKind::Message,
            "INVITE" => CommandKind::Invite,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Ping => "PING",
            CommandKind::Publish => "PUBLISH",
            CommandKind::Subscribe => "SUBSCRIBE",
            CommandKind::Notify => "NOTIFY",
            CommandKind::Register => "REGISTER",
            CommandKind::Refer => "REFER",
            CommandKind::Message => "MESSAGE",
            CommandKind::Invite => "INVITE",
            CommandKind::Unknown => "UNKNOWN",
            CommandKind::Help => "HELP",
            CommandKind::Version => "VERSION",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogConfig {
    pub verbosity: u8,
    pub color: bool,
    pub time: bool,
    pub level: bool,
    pub sender: bool,
    pub trail_dot: bool,
}

/// Everything one run needs, read-only after parsing. Bounded lists are
/// kept as given and capped where they are consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationConfig {
    pub command: CommandKind,
    /// Token that did not name a command, for UNKNOWN.
    pub command_token: Option<String>,
    pub destination: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub contact: Option<String>,
    pub from_name: Option<String>,
    pub transport: String,
    pub expires: i64,
    pub event: Option<String>,
    pub content_type: Option<String>,
    pub pres_status: Option<String>,
    pub pres_note: Option<String>,
    pub mwi: Option<String>,
    pub mwi_account: Option<String>,
    pub list_contacts: bool,
    pub cancel_all: bool,
    pub cancel: bool,
    pub refer_to: Option<String>,
    pub body: Option<String>,
    pub codecs: String,
    pub rtp_port: u16,
    pub user_agent: Option<String>,
    pub headers: Vec<String>,
    pub proxies: Vec<String>,
    pub nameservers: Option<String>,
    pub local_host: Option<String>,
    pub local_port: u16,
    pub logging: LogConfig,
}

impl InvocationConfig {
    pub fn from_cli(cli: Cli) -> Self {
        let (command, command_token, destination) = if cli.help {
            (CommandKind::Help, None, None)
        } else if cli.version {
            (CommandKind::Version, None, None)
        } else {
            classify_positionals(cli.positionals)
        };

        let verbosity = if cli.quiet {
            0
        } else {
            DEFAULT_VERBOSITY
                .saturating_add(cli.verbose_count)
                .saturating_add(cli.verbose_level.unwrap_or(0))
                .min(MAX_VERBOSITY)
        };

        Self {
            command,
            command_token,
            destination,
            username: cli.username,
            password: cli.password,
            contact: cli.contact,
            from_name: cli.from_name,
            transport: cli.proto,
            expires: cli.expires,
            event: cli.event.map(|event| event_alias(&event)),
            content_type: cli.content_type,
            pres_status: cli.pres_status,
            pres_note: cli.pres_note,
            mwi: cli.mwi,
            mwi_account: cli.mwi_acc,
            list_contacts: cli.clist,
            cancel_all: cli.cancel_all,
            cancel: cli.cancel,
            refer_to: cli.to,
            body: cli.body,
            codecs: cli.codec,
            rtp_port: cli.rtp_port,
            user_agent: cli.user_agent,
            headers: cli.headers,
            proxies: cli.proxies,
            nameservers: cli.nameservers,
            local_host: cli.local_host,
            local_port: cli.local_port,
            logging: LogConfig {
                verbosity,
                color: cli.color,
                time: cli.log_time,
                level: cli.log_level,
                sender: cli.log_snd,
                trail_dot: cli.trail_dot,
            },
        }
    }

    pub fn parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Cli::try_parse_from(args).map(Self::from_cli)
    }
}

fn classify_positionals(mut positionals: Vec<String>) -> (CommandKind, Option<String>, Option<String>) {
    match positionals.len() {
        0 => (CommandKind::Help, None, None),
        1 => {
            let token = positionals.remove(0);
            match CommandKind::from_token(&token) {
                Some(kind) => (kind, None, None),
                None => (CommandKind::Ping, None, Some(token)),
            }
        }
        _ => {
            let destination = positionals.remove(1);
            let token = positionals.remove(0);
            match CommandKind::from_token(&token) {
                Some(kind) => (kind, None, Some(destination)),
                None => (CommandKind::Unknown, Some(token), Some(destination)),
            }
        }
    }
}

fn event_alias(event: &str) -> String {
    if event.eq_ignore_ascii_case("mwi") {
        "message-summary".to_string()
    } else {
        event.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> InvocationConfig {
        let mut argv = vec!["sippak"];
        argv.extend_from_slice(args);
        InvocationConfig::parse_from(argv).unwrap()
    }

    #[test]
    fn no_arguments_prints_help() {
        assert_eq!(parse(&[]).command, CommandKind::Help);
        assert_eq!(parse(&["-V"]).command, CommandKind::Version);
        assert_eq!(parse(&["--help", "register"]).command, CommandKind::Help);
    }

    #[test]
    fn destination_alone_means_ping() {
        let cfg = parse(&["sip:alice@example.com"]);
        assert_eq!(cfg.command, CommandKind::Ping);
        assert_eq!(cfg.destination.as_deref(), Some("sip:alice@example.com"));
    }

    #[test]
    fn command_token_is_case_insensitive() {
        let cfg = parse(&["Register", "sip:alice@example.com"]);
        assert_eq!(cfg.command, CommandKind::Register);
        assert_eq!(parse(&["invite"]).command, CommandKind::Invite);
    }

    #[test]
    fn unknown_command_keeps_destination() {
        let cfg = parse(&["frobnicate", "sip:alice@example.com"]);
        assert_eq!(cfg.command, CommandKind::Unknown);
        assert_eq!(cfg.command_token.as_deref(), Some("frobnicate"));
        assert_eq!(cfg.destination.as_deref(), Some("sip:alice@example.com"));
    }

    #[test]
    fn defaults() {
        let cfg = parse(&["ping", "sip:a@b"]);
        assert_eq!(cfg.expires, DEFAULT_EXPIRES);
        assert_eq!(cfg.rtp_port, DEFAULT_RTP_PORT);
        assert_eq!(cfg.codecs, "g711");
        assert_eq!(cfg.transport, "udp");
        assert_eq!(cfg.logging.verbosity, DEFAULT_VERBOSITY);
    }

    #[test]
    fn verbosity_flags() {
        assert_eq!(parse(&["-vv", "sip:a@b"]).logging.verbosity, 5);
        assert_eq!(parse(&["--verbose", "sip:a@b"]).logging.verbosity, 4);
        assert_eq!(parse(&["--verbose=9", "sip:a@b"]).logging.verbosity, MAX_VERBOSITY);
        assert_eq!(parse(&["-q", "-v", "sip:a@b"]).logging.verbosity, 0);
    }

    #[test]
    fn negative_expires_is_accepted_for_later_validation() {
        let cfg = parse(&["publish", "-X", "-5", "sip:a@b"]);
        assert_eq!(cfg.expires, -5);
    }

    #[test]
    fn repeatable_lists_and_event_alias() {
        let cfg = parse(&[
            "notify",
            "-H",
            "X-Foo: bar",
            "--header=X-Bar:baz",
            "-R",
            "sip:p1.example.com",
            "--proxy=sip:p2.example.com;lr",
            "-E",
            "MWI",
            "sip:a@b",
        ]);
        assert_eq!(cfg.headers, vec!["X-Foo: bar", "X-Bar:baz"]);
        assert_eq!(cfg.proxies.len(), 2);
        assert_eq!(cfg.event.as_deref(), Some("message-summary"));
    }

    #[test]
    fn too_many_positionals_is_a_usage_error() {
        assert!(InvocationConfig::parse_from(["sippak", "ping", "sip:a@b", "extra"]).is_err());
    }
}
