//! Turns a parsed command line into a controller and runs it.
//!
//! Everything that can be rejected without touching the network is
//! checked in [`CommandPlan::from_config`], before any socket is opened.

use std::net::SocketAddr;

use clap::CommandFactory;
use log::{debug, info, warn};
use sdp::{parse_codecs, Codec, SessionDescription};
use sip_core::{
    body::{MWI_CONTENT_TYPE, PIDF_CONTENT_TYPE},
    message_summary,
    resolver::select_nameservers,
    Engine, MessageSummary, Method, PresenceStatus, RegistrationKind, RequestBuilder,
    SipStack, SipUri, StackConfig,
};

use crate::{
    binder,
    headers::{self, CustomHeaders},
    session::{
        publish::{validate_expires, PresenceFormat},
        Controller, InviteController, PublishController, RegisterController, RequestController,
        Session,
    },
    settings::{CommandKind, InvocationConfig},
    AppError, ExitStatus,
};

pub const DEFAULT_PUBLISH_EVENT: &str = "presence";
pub const DEFAULT_NOTIFY_EVENT: &str = "keep-alive";
pub const MWI_EVENT: &str = "message-summary";

/// Command specific data, validated.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedCommand {
    Ping,
    Publish {
        format: PresenceFormat,
        event: String,
        expires: u32,
    },
    Subscribe {
        event: String,
        expires: u32,
    },
    Notify {
        event: String,
        mwi: Option<MessageSummary>,
    },
    Register {
        kind: RegistrationKind,
        expires: u32,
    },
    Refer {
        refer_to: String,
    },
    Message {
        body: Option<String>,
    },
    Invite {
        codecs: Vec<Codec>,
        rtp_port: u16,
        early_cancel: bool,
    },
}

#[derive(Debug)]
pub struct CommandPlan<'a> {
    pub config: &'a InvocationConfig,
    pub command: PlannedCommand,
    pub request_uri: SipUri,
    pub user: String,
    pub headers: CustomHeaders,
}

impl<'a> CommandPlan<'a> {
    pub fn from_config(config: &'a InvocationConfig) -> Result<Self, AppError> {
        let command = match config.command {
            CommandKind::Unknown => {
                let token = config.command_token.clone().unwrap_or_default();
                return Err(AppError::UnknownCommand(token));
            }
            CommandKind::Help | CommandKind::Version => {
                return Err(AppError::InvalidArgument(format!(
                    "{} is not a SIP command",
                    config.command.name()
                )))
            }
            CommandKind::Ping => PlannedCommand::Ping,
            CommandKind::Publish => PlannedCommand::Publish {
                expires: validate_expires(config.expires)?,
                format: PresenceFormat::select(config.content_type.as_deref()),
                event: event_or(config, DEFAULT_PUBLISH_EVENT),
            },
            CommandKind::Subscribe => PlannedCommand::Subscribe {
                event: event_or(config, DEFAULT_PUBLISH_EVENT),
                expires: non_negative_expires(config.expires)?,
            },
            CommandKind::Notify => {
                let event = event_or(config, DEFAULT_NOTIFY_EVENT);
                let wants_mwi = event == MWI_EVENT
                    || config
                        .content_type
                        .as_deref()
                        .is_some_and(|ct| ct.eq_ignore_ascii_case("mwi"));
                let mwi = if wants_mwi {
                    Some(match config.mwi.as_deref() {
                        Some(list) => MessageSummary::parse(list).ok_or_else(|| {
                            AppError::InvalidArgument(format!("invalid --mwi list {:?}", list))
                        })?,
                        None => MessageSummary::default(),
                    })
                } else {
                    None
                };
                PlannedCommand::Notify { event, mwi }
            }
            CommandKind::Register => PlannedCommand::Register {
                kind: RegistrationKind::from_flags(
                    config.cancel_all,
                    config.cancel,
                    config.list_contacts,
                ),
                expires: non_negative_expires(config.expires)?,
            },
            CommandKind::Refer => PlannedCommand::Refer {
                refer_to: config.refer_to.clone().ok_or_else(|| {
                    AppError::InvalidArgument("REFER requires --to for the Refer-To header".into())
                })?,
            },
            CommandKind::Message => PlannedCommand::Message {
                body: config.body.clone(),
            },
            CommandKind::Invite => {
                let codecs = parse_codecs(&config.codecs);
                if codecs.is_empty() {
                    return Err(AppError::InvalidArgument(format!(
                        "no supported codec in {:?}",
                        config.codecs
                    )));
                }
                PlannedCommand::Invite {
                    codecs,
                    rtp_port: config.rtp_port,
                    early_cancel: config.cancel,
                }
            }
        };

        if !config.transport.eq_ignore_ascii_case("udp") {
            return Err(AppError::InvalidArgument(format!(
                "transport {:?} is not supported, only udp",
                config.transport
            )));
        }

        let destination = config
            .destination
            .as_deref()
            .ok_or_else(|| AppError::InvalidArgument("destination URI is missing".into()))?;
        let request_uri = headers::request_uri(destination)?;
        let user = headers::local_user(config.username.as_deref(), &request_uri).to_string();
        let headers = headers::custom_headers(&config.headers)?;

        Ok(Self {
            config,
            command,
            request_uri,
            user,
            headers,
        })
    }

    /// Where the request is addressed; REGISTER goes to the domain.
    pub fn target_uri(&self) -> String {
        match self.command {
            PlannedCommand::Register { .. } => self.request_uri.host_uri(),
            _ => self.request_uri.to_string(),
        }
    }

    /// Build the first request and the controller that owns it.
    pub fn into_controller(self, local: SocketAddr) -> Result<Controller, AppError> {
        let config = self.config;
        let ruri = &self.request_uri;
        let target = self.target_uri();
        let from = headers::from_header(config.from_name.as_deref(), &self.user, ruri);
        let to = headers::to_header(ruri);
        let contact = headers::contact_header(config.contact.as_deref(), &self.user, local)?;
        let local_aor = headers::aor(&self.user, ruri);
        let contact_uri = contact.trim_start_matches('<').trim_end_matches('>');

        let controller = match &self.command {
            PlannedCommand::Ping => Controller::Request(RequestController::new(
                self.builder(Method::Options, &target, &from, &to)
                    .contact(&contact)
                    .header("Accept", "application/sdp")
                    .build(),
            )),
            PlannedCommand::Publish {
                format,
                event,
                expires,
            } => {
                let status = PresenceStatus::from_flag(
                    config.pres_status.as_deref(),
                    contact_uri,
                    config.pres_note.as_deref(),
                );
                let body = format.render(&local_aor, &status);
                Controller::Publish(PublishController::new(
                    self.builder(Method::Publish, &target, &from, &to)
                        .header("Event", event)
                        .header("Expires", &expires.to_string())
                        .body(format.content_type(), &body)
                        .build(),
                ))
            }
            PlannedCommand::Subscribe { event, expires } => {
                let mut builder = self
                    .builder(Method::Subscribe, &target, &from, &to)
                    .contact(&contact)
                    .header("Event", event)
                    .header("Expires", &expires.to_string());
                if let Some(accept) = accept_for_event(event) {
                    builder = builder.header("Accept", accept);
                }
                Controller::Request(RequestController::new(builder.build()))
            }
            PlannedCommand::Notify { event, mwi } => {
                let mut builder = self
                    .builder(Method::Notify, &target, &from, &to)
                    .contact(&contact)
                    .header("Event", event)
                    .header("Subscription-State", "active");
                if let Some(summary) = mwi {
                    let account = config
                        .mwi_account
                        .clone()
                        .unwrap_or_else(|| ruri.to_string());
                    builder = builder.body(MWI_CONTENT_TYPE, &message_summary(&account, summary));
                } else if event == DEFAULT_PUBLISH_EVENT {
                    let status = PresenceStatus::from_flag(
                        config.pres_status.as_deref(),
                        contact_uri,
                        config.pres_note.as_deref(),
                    );
                    builder = builder.body(PIDF_CONTENT_TYPE, &sip_core::pidf(&local_aor, &status));
                }
                Controller::Request(RequestController::new(builder.build()))
            }
            PlannedCommand::Register { kind, expires } => {
                let aor = format!("<{}>", local_aor);
                let mut request = kind.build_request(&target, &aor, &aor, &contact, *expires);
                for header in &self.headers {
                    request.add_header(header.clone());
                }
                Controller::Register(RegisterController::new(*kind, request))
            }
            PlannedCommand::Refer { refer_to } => Controller::Request(RequestController::new(
                self.builder(Method::Refer, &target, &from, &to)
                    .contact(&contact)
                    .header("Refer-To", &angle(refer_to))
                    .header("Referred-By", &format!("<{}>", local_aor))
                    .build(),
            )),
            PlannedCommand::Message { body } => {
                let mut builder = self.builder(Method::Message, &target, &from, &to);
                match body.as_deref() {
                    Some(text) => builder = builder.body("text/plain", text),
                    None => warn!("MESSAGE without --body, sending an empty message"),
                }
                Controller::Request(RequestController::new(builder.build()))
            }
            PlannedCommand::Invite {
                codecs,
                rtp_port,
                early_cancel,
            } => {
                let offer = SessionDescription::offer(local.ip(), *rtp_port, codecs)
                    .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
                Controller::Invite(InviteController::new(
                    self.builder(Method::Invite, &target, &from, &to)
                        .contact(&contact)
                        .body("application/sdp", &offer.render())
                        .build(),
                    *early_cancel,
                ))
            }
        };
        Ok(controller)
    }

    fn builder(&self, method: Method, target: &str, from: &str, to: &str) -> RequestBuilder {
        RequestBuilder::new(method, target, from, to).headers(self.headers.iter())
    }
}

pub fn run(config: &InvocationConfig) -> Result<ExitStatus, AppError> {
    match config.command {
        CommandKind::Help => {
            print_usage();
            return Ok(ExitStatus::Success);
        }
        CommandKind::Version => {
            print_version();
            return Ok(ExitStatus::Success);
        }
        _ => {}
    }

    let plan = CommandPlan::from_config(config)?;
    info!("{} {}", config.command.name(), plan.target_uri());

    let nameservers = select_nameservers(config.nameservers.as_deref()).map_err(AppError::Resolver)?;
    if nameservers.is_empty() {
        return Err(match config.nameservers {
            Some(ref list) => AppError::InvalidArgument(format!("no usable name server in {:?}", list)),
            None => AppError::Resolver(sip_core::SipError::Resolver(
                "no IPv4 name server in the system configuration".into(),
            )),
        });
    }

    let mut stack = SipStack::bind(StackConfig {
        local_host: config.local_host.clone(),
        local_port: config.local_port,
        user_agent: config.user_agent.clone(),
        trail_dot: config.logging.trail_dot,
    })
    .map_err(|source| AppError::EngineSetup {
        step: "transport setup",
        source,
    })?;
    stack
        .configure_resolver(&nameservers)
        .map_err(AppError::Resolver)?;

    let binding = binder::bind(&plan.user, config.password.as_deref(), &config.proxies);
    debug!("route set {:?}", binding.route_set);
    stack.set_credentials(binding.credentials);
    stack.set_route_set(binding.route_set);

    let local = stack
        .prepare(&plan.target_uri())
        .map_err(|source| AppError::EngineSetup {
            step: "next hop resolution",
            source,
        })?;

    let controller = plan.into_controller(local)?;
    let outcome = Session::new(stack, controller).run()?;
    debug!("session outcome {:?}", outcome);
    Ok(outcome.exit_status())
}

fn event_or(config: &InvocationConfig, default: &str) -> String {
    config
        .event
        .clone()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn non_negative_expires(expires: i64) -> Result<u32, AppError> {
    u32::try_from(expires)
        .map_err(|_| AppError::InvalidArgument(format!("Invalid expires value {}", expires)))
}

fn accept_for_event(event: &str) -> Option<&'static str> {
    match event {
        DEFAULT_PUBLISH_EVENT => Some(PIDF_CONTENT_TYPE),
        MWI_EVENT => Some(MWI_CONTENT_TYPE),
        _ => None,
    }
}

fn angle(uri: &str) -> String {
    if uri.trim_start().starts_with('<') {
        uri.to_string()
    } else {
        format!("<{}>", uri)
    }
}

fn print_usage() {
    let mut cmd = crate::settings::Cli::command();
    print_version();
    println!("{}", cmd.render_help());
}

fn print_version() {
    println!("sippak {}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_core::Request;

    fn config(args: &[&str]) -> InvocationConfig {
        let mut argv = vec!["sippak"];
        argv.extend_from_slice(args);
        InvocationConfig::parse_from(argv).unwrap()
    }

    fn local() -> SocketAddr {
        "192.0.2.10:5060".parse().unwrap()
    }

    fn first_request(plan: CommandPlan<'_>) -> Request {
        let mut controller = plan.into_controller(local()).unwrap();
        match controller.start().remove(0) {
            crate::session::Effect::Send(request) => request,
            other => panic!("expected a request, got {:?}", other),
        }
    }

    #[test]
    fn publish_with_bad_expires_is_rejected_before_setup() {
        for expires in ["0", "-3"] {
            let cfg = config(&["publish", "-X", expires, "sip:alice@example.com"]);
            let err = CommandPlan::from_config(&cfg).unwrap_err();
            assert_eq!(err.exit_status(), ExitStatus::InvalidArgument);
        }
        // run() fails the same way without needing a network.
        let cfg = config(&["publish", "-X", "0", "sip:alice@example.com"]);
        assert!(matches!(run(&cfg), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn unknown_command_is_a_config_error() {
        let cfg = config(&["hello", "sip:alice@example.com"]);
        assert!(matches!(
            CommandPlan::from_config(&cfg),
            Err(AppError::UnknownCommand(token)) if token == "hello"
        ));
    }

    #[test]
    fn refer_requires_target() {
        let cfg = config(&["refer", "sip:alice@example.com"]);
        assert!(matches!(
            CommandPlan::from_config(&cfg),
            Err(AppError::InvalidArgument(_))
        ));

        let cfg = config(&["refer", "--to", "sip:carol@example.com", "sip:alice@example.com"]);
        let req = first_request(CommandPlan::from_config(&cfg).unwrap());
        assert_eq!(req.method, Method::Refer);
        assert_eq!(req.header("Refer-To"), Some("<sip:carol@example.com>"));
        assert_eq!(req.header("Referred-By"), Some("<sip:alice@example.com>"));
    }

    #[test]
    fn tcp_is_not_supported() {
        let cfg = config(&["-t", "tcp", "sip:alice@example.com"]);
        assert!(CommandPlan::from_config(&cfg).is_err());
    }

    #[test]
    fn malformed_custom_header_is_rejected() {
        let cfg = config(&["-H", "broken", "sip:alice@example.com"]);
        assert!(matches!(
            CommandPlan::from_config(&cfg),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn ping_is_options_with_custom_headers() {
        let cfg = config(&["-H", "X-Foo: bar", "-F", "Alice", "sip:bob@example.com"]);
        let req = first_request(CommandPlan::from_config(&cfg).unwrap());
        assert_eq!(req.method, Method::Options);
        assert_eq!(req.uri, "sip:bob@example.com");
        assert_eq!(req.header("X-Foo"), Some("bar"));
        assert!(req.header("From").unwrap().starts_with("\"Alice\" <sip:bob@example.com>;tag="));
        assert_eq!(req.header("Contact"), Some("<sip:bob@192.0.2.10:5060>"));
    }

    #[test]
    fn publish_builds_presence_body() {
        let cfg = config(&[
            "publish",
            "-u",
            "alice",
            "-C",
            "xpidf",
            "--pres-status",
            "closed",
            "sip:alice@example.com",
        ]);
        let plan = CommandPlan::from_config(&cfg).unwrap();
        assert!(matches!(
            plan.command,
            PlannedCommand::Publish { format: PresenceFormat::Xpidf, expires: 3600, .. }
        ));
        let req = first_request(plan);
        assert_eq!(req.header("Event"), Some("presence"));
        assert_eq!(req.header("Expires"), Some("3600"));
        assert_eq!(req.header("Content-Type"), Some("application/xpidf+xml"));
        assert!(req.body.contains("closed"));
    }

    #[test]
    fn register_goes_to_domain() {
        let cfg = config(&["register", "-u", "alice", "sip:bob@example.com:5070"]);
        let plan = CommandPlan::from_config(&cfg).unwrap();
        assert_eq!(plan.target_uri(), "sip:example.com:5070");
        let req = first_request(plan);
        assert_eq!(req.method, Method::Register);
        assert_eq!(req.header("Contact"), Some("<sip:alice@192.0.2.10:5060>"));
        assert_eq!(req.header("Expires"), Some("3600"));
        assert!(req.header("To").unwrap().contains("sip:alice@example.com"));
    }

    #[test]
    fn notify_mwi_body() {
        let cfg = config(&["notify", "-E", "mwi", "-M", "2,1", "sip:alice@example.com"]);
        let req = first_request(CommandPlan::from_config(&cfg).unwrap());
        assert_eq!(req.header("Event"), Some("message-summary"));
        assert_eq!(req.header("Subscription-State"), Some("active"));
        assert_eq!(req.header("Content-Type"), Some(MWI_CONTENT_TYPE));
        assert!(req.body.contains("Messages-Waiting: yes"));
        assert!(req.body.contains("Voice-Message: 2/1 (0/0)"));
    }

    #[test]
    fn notify_defaults_to_keep_alive_without_body() {
        let cfg = config(&["notify", "sip:alice@example.com"]);
        let req = first_request(CommandPlan::from_config(&cfg).unwrap());
        assert_eq!(req.header("Event"), Some("keep-alive"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn subscribe_accept_follows_event() {
        let cfg = config(&["subscribe", "sip:alice@example.com"]);
        let req = first_request(CommandPlan::from_config(&cfg).unwrap());
        assert_eq!(req.header("Accept"), Some(PIDF_CONTENT_TYPE));
    }

    #[test]
    fn message_carries_text_body() {
        let cfg = config(&["message", "--body", "hello there", "sip:alice@example.com"]);
        let req = first_request(CommandPlan::from_config(&cfg).unwrap());
        assert_eq!(req.header("Content-Type"), Some("text/plain"));
        assert_eq!(req.body, "hello there");
    }

    #[test]
    fn invite_offers_selected_codecs() {
        let cfg = config(&["invite", "--codec", "g711,gsm", "--rtp-port", "4010", "sip:bob@example.com"]);
        let req = first_request(CommandPlan::from_config(&cfg).unwrap());
        assert_eq!(req.header("Content-Type"), Some("application/sdp"));
        assert!(req.body.contains("m=audio 4010 RTP/AVP 0 8 3\r\n"));
        assert!(req.body.contains("c=IN IP4 192.0.2.10\r\n"));

        let cfg = config(&["invite", "--codec", "opus", "sip:bob@example.com"]);
        assert!(CommandPlan::from_config(&cfg).is_err());
    }

    #[test]
    fn invite_cancel_flag_enables_early_cancel() {
        let cfg = config(&["invite", "--cancel", "sip:bob@example.com"]);
        let plan = CommandPlan::from_config(&cfg).unwrap();
        assert!(matches!(
            plan.command,
            PlannedCommand::Invite { early_cancel: true, .. }
        ));
    }
}
