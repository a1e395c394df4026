//! Surveyor envoys.
//!
//! The DataRouter is the part of the GET DAQ that takes data from the
//! CoBo/MuTaNT and writes it to storage. The Surveyor is an AT-TPC extension
//! that inspects the DataRouter host and writes a plain-text status page.
//! Surveyor envoys can only read that page; no commands are sent.

use crate::config::NetworkConfig;
use crate::error::EnvoyError;
use crate::message::{EmbassyMessage, MessageKind, MessagePayload};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const SURVEYOR_ONLINE: &str = "Online";
const SURVEYOR_OFFLINE: &str = "Offline";
const SURVEYOR_INCONSISTENT: &str = "Inconsistent";
const SURVEYOR_INVALID: &str = "Invalid";

const DISK_FILLED: &str = "Filled";
const DISK_EMPTY: &str = "Empty";
const DISK_NA: &str = "N/A";

/// `df` reports sizes in 512-byte blocks
const DF_BLOCK_SIZE: u64 = 512;

/// Status of a DataRouter and its machine as reported by the Surveyor
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SurveyorResponse {
    pub state: i32,
    pub address: String,
    pub location: String,
    pub disk_status: String,
    pub percent_used: String,
    pub disk_space: u64,
    pub files: i32,
    pub bytes_used: u64,
    pub data_rate: f64,
}

impl Default for SurveyorResponse {
    fn default() -> Self {
        Self {
            state: 0,
            address: String::from(DISK_NA),
            location: String::from(DISK_NA),
            disk_status: String::from(DISK_NA),
            percent_used: String::from(DISK_NA),
            disk_space: 0,
            files: 0,
            bytes_used: 0,
            data_rate: 0.0,
        }
    }
}

impl MessagePayload for SurveyorResponse {
    const KIND: MessageKind = MessageKind::SurveyorStatus;
}

/// Status of a Surveyor (or of the whole Surveyor system)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurveyorStatus {
    Offline,
    Online,
    Invalid,
    Inconsistent,
}

impl From<i32> for SurveyorStatus {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Offline,
            1 => Self::Online,
            _ => Self::Invalid,
        }
    }
}

impl std::fmt::Display for SurveyorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "{SURVEYOR_OFFLINE}"),
            Self::Online => write!(f, "{SURVEYOR_ONLINE}"),
            Self::Invalid => write!(f, "{SURVEYOR_INVALID}"),
            Self::Inconsistent => write!(f, "{SURVEYOR_INCONSISTENT}"),
        }
    }
}

/// Whether the DataRouter has written any graw files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurveyorDiskStatus {
    Filled,
    Empty,
    NA,
}

impl From<&str> for SurveyorDiskStatus {
    fn from(value: &str) -> Self {
        match value {
            DISK_FILLED => Self::Filled,
            DISK_EMPTY => Self::Empty,
            _ => Self::NA,
        }
    }
}

impl std::fmt::Display for SurveyorDiskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filled => write!(f, "{DISK_FILLED}"),
            Self::Empty => write!(f, "{DISK_EMPTY}"),
            Self::NA => write!(f, "{DISK_NA}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SurveyorConfig {
    id: usize,
    address: String,
    url: String,
}

impl SurveyorConfig {
    pub fn new(id: usize, network: &NetworkConfig) -> Self {
        let address = network.router_address(id);
        let url = format!(
            "http://{}:{}/~attpc/surveyor.html",
            address, network.surveyor_port
        );
        Self { id, address, url }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Tracks the byte count between polls so a data rate can be computed
#[derive(Debug, Clone)]
pub struct SurveyorParser {
    address: String,
    interval_secs: f64,
    last_bytes: u64,
}

impl SurveyorParser {
    pub fn new(address: &str, interval: Duration) -> Self {
        Self {
            address: address.to_string(),
            interval_secs: interval.as_secs_f64().max(f64::EPSILON),
            last_bytes: 0,
        }
    }

    /// Parse a Surveyor page.
    ///
    /// Layout: line 0 is the state flag, line 1 the data location, line 3
    /// the `df` row for the data disk, and every later line containing
    /// `graw` is an `ls -l` row of a data file. Returns `None` for an empty
    /// page.
    pub fn parse(&mut self, page: &str) -> Result<Option<SurveyorResponse>, EnvoyError> {
        let lines: Vec<&str> = page.lines().collect();
        let Some(first) = lines.first() else {
            return Ok(None);
        };

        let mut status = SurveyorResponse {
            state: first.trim().parse::<i32>()?,
            ..Default::default()
        };
        if status.state == 0 {
            return Ok(Some(status));
        }
        if lines.len() < 4 {
            return Err(EnvoyError::MalformedSurveyor(format!(
                "expected at least 4 lines, found {}",
                lines.len()
            )));
        }

        status.address = self.address.clone();
        status.location = lines[1].trim().to_string();

        let df: Vec<&str> = lines[3].split_whitespace().collect();
        if df.len() < 5 {
            return Err(EnvoyError::MalformedSurveyor(format!(
                "disk line has {} columns",
                df.len()
            )));
        }
        status.percent_used = df[4].to_string();
        status.disk_space = df[1].parse::<u64>()? * DF_BLOCK_SIZE;

        let mut bytes: u64 = 0;
        let mut n_files = 0;
        for line in lines[4..].iter().filter(|l| l.contains("graw")) {
            let entries: Vec<&str> = line.split_whitespace().collect();
            let size = entries.get(4).ok_or_else(|| {
                EnvoyError::MalformedSurveyor(format!("file line too short: {line}"))
            })?;
            bytes += size.parse::<u64>()?;
            n_files += 1;
        }

        status.disk_status = if n_files > 0 {
            String::from(DISK_FILLED)
        } else {
            String::from(DISK_EMPTY)
        };
        status.files = n_files;
        status.bytes_used = bytes;
        // MB/s; a drop in bytes (files moved away) reads as zero rate
        status.data_rate = (bytes.saturating_sub(self.last_bytes) as f64) * 1.0e-6 / self.interval_secs;
        self.last_bytes = bytes;

        Ok(Some(status))
    }
}

/// Async task polling one Surveyor page
#[derive(Debug)]
pub struct SurveyorEnvoy {
    config: SurveyorConfig,
    connection: Client,
    outgoing: mpsc::Sender<EmbassyMessage>,
    cancel: broadcast::Receiver<EmbassyMessage>,
    parser: SurveyorParser,
}

impl SurveyorEnvoy {
    pub fn new(
        config: SurveyorConfig,
        tx: mpsc::Sender<EmbassyMessage>,
        cancel: broadcast::Receiver<EmbassyMessage>,
        interval: Duration,
        request_timeout: Duration,
    ) -> Result<Self, EnvoyError> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()?;
        let parser = SurveyorParser::new(&config.address, interval);
        Ok(Self {
            config,
            connection: client,
            outgoing: tx,
            cancel,
            parser,
        })
    }

    /// Core task loop. Checks the Surveyor every `interval`; an unreachable
    /// or unreadable page is reported as a default (offline) status.
    pub async fn wait_check_status(&mut self, interval: Duration) -> Result<(), EnvoyError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.recv() => {
                    return Ok(());
                }

                _ = ticker.tick() => {
                    match self.submit_check_status().await {
                        Ok(Some(status)) => {
                            let message = EmbassyMessage::compose(&status, self.config.id)?;
                            self.outgoing.send(message).await?
                        }
                        Ok(None) => (),
                        Err(e) => {
                            tracing::debug!(router = self.config.id, "Surveyor check failed: {e}");
                            let message = EmbassyMessage::compose(&SurveyorResponse::default(), self.config.id)?;
                            self.outgoing.send(message).await?
                        }
                    }
                }
            }
        }
    }

    async fn submit_check_status(&mut self) -> Result<Option<SurveyorResponse>, EnvoyError> {
        let page = self
            .connection
            .get(self.config.url())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        self.parser.parse(&page)
    }
}

/// Spawn a SurveyorEnvoy per config. Must be called from inside a tokio
/// runtime.
pub fn startup_surveyor_envoys(
    configs: &[SurveyorConfig],
    interval: Duration,
    request_timeout: Duration,
    surveyor_tx: &mpsc::Sender<EmbassyMessage>,
    cancel: &broadcast::Sender<EmbassyMessage>,
) -> Vec<JoinHandle<()>> {
    let mut handles: Vec<JoinHandle<()>> = vec![];

    for config in configs {
        let id = config.id();
        let envoy = SurveyorEnvoy::new(
            config.clone(),
            surveyor_tx.clone(),
            cancel.subscribe(),
            interval,
            request_timeout,
        );
        let handle = tokio::spawn(async move {
            match envoy {
                Ok(mut ev) => {
                    if let Err(e) = ev.wait_check_status(interval).await {
                        tracing::error!(router = id, "Surveyor status envoy ran into an error: {e}")
                    }
                }
                Err(e) => tracing::error!(router = id, "Error creating Surveyor status envoy: {e}"),
            }
        });
        handles.push(handle);
    }

    handles
}
