//! Operator commands: parsing, server resolution and replies.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{CommandError, ResolveError};
use crate::lifecycle::{Lifecycle, Operation};
use crate::notify::Notifier;
use crate::probe::Prober;
use crate::server::Server;

const HELP: &str = "\
commands:
  help             this text
  ping             check the bot is alive
  uptime           where the bot runs and for how long
  list             every server and its status
  info <server>    status, counters and a live probe
  start <server>   power a server on
  stop <server>    deallocate a server (refused while players are online)
<server> is any unique part of the server's host";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ping,
    Uptime,
    List,
    Info(String),
    Start(String),
    Stop(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Self::Help);
        };
        let verb = verb.strip_prefix('.').unwrap_or(verb).to_ascii_lowercase();
        let arg = words.next();
        let extra = words.next().is_some();

        let target = |usage: &'static str| match (arg, extra) {
            (Some(arg), false) => Ok(arg.to_string()),
            _ => Err(CommandError::Usage(usage)),
        };
        match verb.as_str() {
            "help" => Ok(Self::Help),
            "ping" => Ok(Self::Ping),
            "uptime" => Ok(Self::Uptime),
            "list" | "ls" => Ok(Self::List),
            "info" => target("info <server>").map(Self::Info),
            "start" => target("start <server>").map(Self::Start),
            "stop" | "deallocate" => target("stop <server>").map(Self::Stop),
            _ => Err(CommandError::Unknown(verb)),
        }
    }
}

/// Pick out the one server whose host contains `token`.
pub fn resolve<'a>(servers: &'a [Arc<Server>], token: &str) -> Result<&'a Arc<Server>, ResolveError> {
    let needle = token.to_ascii_lowercase();
    let matches: Vec<&Arc<Server>> = servers
        .iter()
        .filter(|s| s.host.to_ascii_lowercase().contains(&needle))
        .collect();

    match matches.as_slice() {
        [] => Err(ResolveError::NotFound(token.to_string())),
        [server] => Ok(*server),
        many => Err(ResolveError::Ambiguous {
            token: token.to_string(),
            candidates: many.iter().map(|s| s.host.clone()).collect(),
        }),
    }
}

#[derive(Clone)]
pub struct CommandRouter {
    servers: Arc<[Arc<Server>]>,
    lifecycle: Arc<Lifecycle>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    host_name: String,
    started_at: DateTime<Utc>,
}

impl CommandRouter {
    pub fn new(
        servers: Arc<[Arc<Server>]>,
        lifecycle: Arc<Lifecycle>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        host_name: String,
    ) -> Self {
        Self {
            servers,
            lifecycle,
            prober,
            notifier,
            host_name,
            started_at: Utc::now(),
        }
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    pub fn resolve(&self, token: &str) -> Result<&Arc<Server>, ResolveError> {
        resolve(&self.servers, token)
    }

    /// Run one line of operator input and return the reply.
    pub async fn handle(&self, line: &str) -> String {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => return e.to_string(),
        };
        tracing::info!(?command, "operator command");

        match command {
            Command::Help => HELP.to_string(),
            Command::Ping => "pong".to_string(),
            Command::Uptime => self.uptime(),
            Command::List => self.list().await,
            Command::Info(token) => match self.resolve(&token) {
                Ok(server) => self.info(server).await,
                Err(e) => e.to_string(),
            },
            Command::Start(token) => match self.resolve(&token) {
                Ok(server) => self.spawn(server.clone(), Operation::Start),
                Err(e) => e.to_string(),
            },
            Command::Stop(token) => match self.resolve(&token) {
                Ok(server) => self.spawn(server.clone(), Operation::Deallocate),
                Err(e) => e.to_string(),
            },
        }
    }

    fn uptime(&self) -> String {
        let elapsed = (Utc::now() - self.started_at).num_seconds().max(0);
        let elapsed = Duration::from_secs(elapsed.unsigned_abs());
        format!(
            "host: {}\nuptime: {}",
            self.host_name,
            humantime::format_duration(elapsed)
        )
    }

    async fn list(&self) -> String {
        let mut lines = Vec::with_capacity(self.servers.len());
        for server in self.servers.iter() {
            let status = format!("[{}]", server.status().await);
            lines.push(format!("{status:<11}{}", server.address()));
        }
        lines.join("\n")
    }

    async fn info(&self, server: &Server) -> String {
        let snap = server.snapshot().await;
        let mut out = format!(
            "{}\n\
             vm: {}/{}\n\
             status: {}{}\n\
             idle checks: {}/{}\n\
             failed checks: {}/{}\n",
            server.address(),
            snap.resource_group,
            snap.name,
            snap.status,
            if snap.operation_in_flight { " (operation in flight)" } else { "" },
            snap.consecutive_idle,
            snap.deallocation_threshold,
            snap.consecutive_errors,
            snap.deallocation_threshold,
        );
        match server.probe(&*self.prober).await {
            Ok(pong) => out.push_str(&pong.pretty()),
            Err(e) => out.push_str(&format!("not answering: {e}")),
        }
        out
    }

    /// Kick off an operation in the background and acknowledge at once. The
    /// outcome goes to the notifier.
    pub fn spawn(&self, server: Arc<Server>, operation: Operation) -> String {
        let ack = match operation {
            Operation::Start => format!("received start request for {}", server.host),
            Operation::Deallocate => format!("received deallocation request for {}", server.host),
        };

        let lifecycle = self.lifecycle.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let result = match operation {
                Operation::Start => lifecycle.start(&server).await,
                Operation::Deallocate => lifecycle.deallocate(&server).await,
            };
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(server = %server.host, %operation, error = %e, "operator request failed");
                    let verb = match operation {
                        Operation::Start => "starting",
                        Operation::Deallocate => "deallocating",
                    };
                    format!("error {verb} {}:\n{e}", server.host)
                }
            };
            notifier.notify(&message).await;
        });

        ack
    }
}
