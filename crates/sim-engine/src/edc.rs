//! The EDC link: framed request/reply transport over a stream socket, and the batch/reply
//! grammar carried over it.
//!
//! The original tool speaks this grammar over a Unix domain socket; this crate substitutes a
//! loopback TCP listener for portability (see `DESIGN.md`). The framing and `|`-separated
//! grammar are otherwise identical.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;

use edcsim_core::ipp::{IppMessage, SchedulingAllocation, SERVER_MAILBOX};
use edcsim_core::{MachineRange, SimError};

use crate::context::SimContext;

/// The protocol version this crate speaks. Carried verbatim in every request's first part.
pub const PROTOCOL_VERSION: u32 = 1;

/// One stamped event queued for the next request to the EDC.
#[derive(Debug, Clone)]
pub struct BatchEvent {
    /// Virtual time the event was appended at.
    pub timestamp: f64,
    /// The single-character stamp (`S`, `C`, `N`, `p`, `e`).
    pub stamp: char,
    /// The stamp's content, if it carries one.
    pub content: Option<String>,
}

impl BatchEvent {
    fn render(&self) -> String {
        match &self.content {
            Some(content) => format!("{:.6}:{}:{}", self.timestamp, self.stamp, content),
            None => format!("{:.6}:{}", self.timestamp, self.stamp),
        }
    }
}

/// A parsed EDC reply: its reference time and the stamped events it carries, in declared order.
#[derive(Debug, Clone)]
struct ReplyMessage {
    now: f64,
    events: Vec<(f64, char, Option<String>)>,
}

/// A connected EDC, reachable over a single TCP stream. Only one request/reply exchange may be
/// in flight at a time, so the stream is guarded by an async mutex purely to make that contract
/// type-checked rather than relied upon.
#[derive(Clone)]
pub struct EdcLink {
    stream: Arc<AsyncMutex<TcpStream>>,
}

impl EdcLink {
    /// Binds `addr`, accepts exactly one incoming connection (the EDC), and returns a link to it.
    pub async fn accept(addr: &str) -> Result<Self, SimError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SimError::configuration(format!("cannot bind EDC socket {addr}: {e}")))?;
        Self::accept_on(&listener).await
    }

    /// Accepts exactly one incoming connection on an already-bound `listener` and returns a link
    /// to it. Split out of [`EdcLink::accept`] so a test can bind to an OS-assigned port (`:0`),
    /// learn the real address, and connect a stub EDC to it without a bind/connect race.
    pub async fn accept_on(listener: &TcpListener) -> Result<Self, SimError> {
        let (stream, _peer) = listener
            .accept()
            .await
            .map_err(|e| SimError::transport(format!("EDC never connected: {e}")))?;
        Ok(EdcLink { stream: Arc::new(AsyncMutex::new(stream)) })
    }

    async fn send_frame(&self, text: &str) -> Result<(), SimError> {
        let mut stream = self.stream.lock().await;
        let bytes = text.as_bytes();
        let len = u32::try_from(bytes.len())
            .map_err(|_| SimError::transport("outbound EDC message too large to frame"))?;
        stream
            .write_all(&len.to_le_bytes())
            .await
            .map_err(|e| SimError::transport(format!("writing EDC frame length: {e}")))?;
        stream
            .write_all(bytes)
            .await
            .map_err(|e| SimError::transport(format!("writing EDC frame body: {e}")))?;
        Ok(())
    }

    async fn recv_frame(&self) -> Result<String, SimError> {
        let mut stream = self.stream.lock().await;
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| SimError::transport(format!("EDC closed before sending a frame length: {e}")))?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|e| SimError::transport(format!("EDC closed before sending {len} promised bytes: {e}")))?;
        String::from_utf8(body)
            .map_err(|e| SimError::protocol(format!("EDC frame is not valid UTF-8: {e}")))
    }
}

fn format_request(now: f64, events: &[BatchEvent]) -> String {
    let mut parts = vec![format!("{PROTOCOL_VERSION}:{now:.6}")];
    parts.extend(events.iter().map(BatchEvent::render));
    parts.join("|")
}

fn parse_reply(text: &str) -> Result<ReplyMessage, SimError> {
    let mut parts = text.split('|');
    let header = parts
        .next()
        .ok_or_else(|| SimError::protocol("empty EDC reply"))?;
    let (version_str, now_str) = header
        .split_once(':')
        .ok_or_else(|| SimError::protocol(format!("malformed EDC reply header {header:?}")))?;
    let version: u32 = version_str
        .parse()
        .map_err(|_| SimError::protocol(format!("malformed protocol version in {header:?}")))?;
    if version != PROTOCOL_VERSION {
        return Err(SimError::protocol(format!(
            "EDC speaks protocol version {version}, expected {PROTOCOL_VERSION}"
        )));
    }
    let now: f64 = now_str
        .parse()
        .map_err(|_| SimError::protocol(format!("malformed reply timestamp in {header:?}")))?;

    let mut events = Vec::new();
    for part in parts {
        if part.is_empty() {
            continue;
        }
        let mut fields = part.splitn(3, ':');
        let timestamp_str = fields
            .next()
            .ok_or_else(|| SimError::protocol(format!("malformed EDC event {part:?}")))?;
        let stamp_str = fields
            .next()
            .ok_or_else(|| SimError::protocol(format!("EDC event {part:?} has no stamp")))?;
        let content = fields.next().map(str::to_string);

        let timestamp: f64 = timestamp_str
            .parse()
            .map_err(|_| SimError::protocol(format!("malformed event timestamp in {part:?}")))?;
        let mut chars = stamp_str.chars();
        let stamp = chars
            .next()
            .filter(|_| chars.next().is_none())
            .ok_or_else(|| SimError::protocol(format!("EDC stamp must be one character: {part:?}")))?;

        events.push((timestamp, stamp, content));
    }

    Ok(ReplyMessage { now, events })
}

fn parse_allocations(content: &str) -> Result<Vec<SchedulingAllocation>, SimError> {
    content
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (job_str, machines_str) = entry
                .split_once('=')
                .ok_or_else(|| SimError::protocol(format!("malformed allocation entry {entry:?}")))?;
            let job_id: u32 = job_str
                .parse()
                .map_err(|_| SimError::protocol(format!("malformed job id in allocation {entry:?}")))?;
            let machine_ids = MachineRange::from_ids(
                machines_str
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(|id| {
                        id.parse::<u32>()
                            .map_err(|_| SimError::protocol(format!("malformed machine id in {entry:?}")))
                    })
                    .collect::<Result<Vec<u32>, SimError>>()?,
            );
            Ok(SchedulingAllocation { job_id, machine_ids })
        })
        .collect()
}

fn parse_range_eq_pstate(content: &str) -> Result<(MachineRange, u32), SimError> {
    let (range_str, pstate_str) = content
        .split_once('=')
        .ok_or_else(|| SimError::protocol(format!("malformed pstate change {content:?}")))?;
    let range = MachineRange::from_hyphen_string(range_str)
        .map_err(|e| SimError::protocol(format!("malformed machine range in {content:?}: {e}")))?;
    let pstate: u32 = pstate_str
        .parse()
        .map_err(|_| SimError::protocol(format!("malformed pstate id in {content:?}")))?;
    Ok((range, pstate))
}

/// Sends one request built from `events` and plays the reply back into the server mailbox,
/// sleeping in virtual time between successive events so their declared timestamps land exactly.
/// Any protocol or transport error is reported via [`SimContext::fail_anyhow`] rather than
/// panicking — the caller (the orchestrator) is a different task and cannot observe a `Result`
/// from this one.
pub async fn run_request_reply(ctx: Arc<SimContext>, edc: EdcLink, now: f64, events: Vec<BatchEvent>) {
    if let Err(err) = run_request_reply_inner(&ctx, &edc, now, events).await {
        ctx.fail_anyhow(err);
    }
}

async fn run_request_reply_inner(
    ctx: &Arc<SimContext>,
    edc: &EdcLink,
    now: f64,
    events: Vec<BatchEvent>,
) -> anyhow::Result<()> {
    for event in &events {
        ctx.record_trace(format!("-> EDC {}", event.render()));
    }
    let request = format_request(now, &events);
    edc.send_frame(&request).await.context("sending a batch request to the EDC")?;

    let wait_started = Instant::now();
    let reply_text = edc.recv_frame().await.context("receiving a reply from the EDC")?;
    ctx.accrue_scheduler_wall_micros(wait_started.elapsed().as_micros() as u64);

    let reply = parse_reply(&reply_text).context("parsing the EDC's reply")?;

    let mut previous = reply.now;
    for (timestamp, stamp, content) in reply.events {
        if timestamp < previous {
            return Err(SimError::protocol(format!(
                "EDC reply timestamps are not non-decreasing: {timestamp} follows {previous}"
            ))
            .into());
        }
        let delta = (timestamp - previous).max(0.0);
        ctx.kernel.sleep(delta).await;
        previous = timestamp;

        ctx.record_trace(format!(
            "<- EDC {timestamp:.6}:{stamp}{}",
            content.as_deref().map(|c| format!(":{c}")).unwrap_or_default()
        ));

        let message = match stamp {
            'N' => IppMessage::SchedNop,
            'n' => {
                let content = content
                    .ok_or_else(|| SimError::protocol("'n' event missing a target time"))?;
                let target_time: f64 = content
                    .parse()
                    .map_err(|_| SimError::protocol(format!("malformed target time {content:?}")))?;
                IppMessage::SchedNopMeLater { target_time }
            }
            'R' => {
                let content =
                    content.ok_or_else(|| SimError::protocol("'R' event missing a job id"))?;
                let job_id: u32 = content
                    .parse()
                    .map_err(|_| SimError::protocol(format!("malformed job id {content:?}")))?;
                IppMessage::SchedRejection { job_id }
            }
            'J' => {
                let content =
                    content.ok_or_else(|| SimError::protocol("'J' event missing allocations"))?;
                IppMessage::SchedAllocation { allocations: parse_allocations(&content)? }
            }
            'P' => {
                let content =
                    content.ok_or_else(|| SimError::protocol("'P' event missing a pstate change"))?;
                let (machine_ids, new_pstate) = parse_range_eq_pstate(&content)?;
                IppMessage::PstateModification { machine_ids, new_pstate }
            }
            other => {
                return Err(SimError::protocol(format!("unknown EDC stamp {other:?}")).into());
            }
        };
        ctx.kernel.send(SERVER_MAILBOX, message);
    }

    ctx.kernel.send(SERVER_MAILBOX, IppMessage::SchedReady);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_a_request_with_no_events() {
        assert_eq!(format_request(0.0, &[]), "1:0.000000");
    }

    #[test]
    fn formats_and_parses_a_round_trip() {
        let events = vec![
            BatchEvent { timestamp: 0.0, stamp: 'S', content: Some("1".to_string()) },
            BatchEvent { timestamp: 2.5, stamp: 'C', content: Some("1".to_string()) },
            BatchEvent { timestamp: 2.5, stamp: 'N', content: None },
        ];
        let request = format_request(0.0, &events);
        assert_eq!(request, "1:0.000000|0.000000:S:1|2.500000:C:1|2.500000:N");
    }

    #[test]
    fn parses_a_j_reply() {
        let reply = parse_reply("1:0.000000|0.000000:J:1=0,1;2=2,3").unwrap();
        assert_eq!(reply.now, 0.0);
        assert_eq!(reply.events.len(), 1);
        let allocations = parse_allocations(reply.events[0].2.as_deref().unwrap()).unwrap();
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].job_id, 1);
        assert_eq!(allocations[0].machine_ids.to_hyphen_string(), "0-1");
        assert_eq!(allocations[1].job_id, 2);
        assert_eq!(allocations[1].machine_ids.to_hyphen_string(), "2-3");
    }

    #[test]
    fn rejects_wrong_protocol_version() {
        assert!(parse_reply("99:0.0|0.0:N").is_err());
    }

    #[test]
    fn rejects_non_monotonic_reply() {
        let reply = parse_reply("1:0.0|5.0:N|2.0:N").unwrap();
        assert!(reply.events[1].0 < reply.events[0].0);
    }

    #[test]
    fn parses_a_pstate_change() {
        let (range, pstate) = parse_range_eq_pstate("0-3,7=2").unwrap();
        assert_eq!(range.to_hyphen_string(), "0-3,7");
        assert_eq!(pstate, 2);
    }
}
