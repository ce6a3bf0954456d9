use std::str::FromStr;

use crate::{Error, Result};

/// Number of `;`-separated fields that precede the free-form remainder.
pub const PONG_FIELDS: usize = 12;

/// Server status advertised in an unconnected pong.
///
/// ```text
/// MCPE;Dedicated Server;527;1.19.1;0;10;13253860892328930865;Bedrock level;Survival;1;19132;19133;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    /// `MCPE`, or `MCEE` for Education Edition.
    pub edition: String,
    /// MOTD line 1 (`server-name` in server.properties).
    pub server_name: String,
    pub protocol_version: u32,
    pub version_name: String,
    pub player_count: u32,
    pub max_player_count: u32,
    pub server_unique_id: u64,
    /// MOTD line 2 (`level-name` in server.properties).
    pub world_name: String,
    pub game_mode: String,
    pub game_mode_numeric: u32,
    pub port_v4: u16,
    pub port_v6: u16,
    /// Whatever the server appended after the known fields.
    pub remaining: String,
}

impl Pong {
    /// Decode the textual payload of a pong.
    pub fn parse(payload: &str) -> Result<Self> {
        let fields: Vec<&str> = payload.splitn(PONG_FIELDS + 1, ';').collect();
        if fields.len() < PONG_FIELDS {
            return Err(Error::MissingFields {
                found: fields.len(),
                payload: payload.to_string(),
            });
        }

        let edition = fields[0];
        if edition != "MCPE" && edition != "MCEE" {
            return Err(Error::UnknownEdition(edition.to_string()));
        }

        Ok(Self {
            edition: edition.to_string(),
            server_name: fields[1].to_string(),
            protocol_version: number("protocol_version", fields[2])?,
            version_name: fields[3].to_string(),
            player_count: number("player_count", fields[4])?,
            max_player_count: number("max_player_count", fields[5])?,
            server_unique_id: number("server_unique_id", fields[6])?,
            world_name: fields[7].to_string(),
            game_mode: fields[8].to_string(),
            game_mode_numeric: number("game_mode_numeric", fields[9])?,
            port_v4: number("port_v4", fields[10])?,
            port_v6: number("port_v6", fields[11])?,
            remaining: fields.get(PONG_FIELDS).copied().unwrap_or_default().to_string(),
        })
    }

    /// Multi-line human summary, as shown by the `info` command.
    pub fn pretty(&self) -> String {
        format!(
            "Edition: {}\n\
             Version: {}\n\
             ServerName: {}\n\
             WorldName: {}\n\
             Players: {}/{}\n\
             GameMode: {} ({})\n\
             Port: {} (IPv4), {} (IPv6)",
            self.edition,
            self.version_name,
            self.server_name,
            self.world_name,
            self.player_count,
            self.max_player_count,
            self.game_mode,
            self.game_mode_numeric,
            self.port_v4,
            self.port_v6,
        )
    }
}

impl FromStr for Pong {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn number<T: FromStr>(field: &'static str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| Error::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}
