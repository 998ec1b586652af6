//! Per-callsign discovery: drive the remote into BBS command mode, ask
//! for its journal listing, and record every callsign and route it
//! reports.

use crate::callsign::{scan_candidates, Callsign};
use crate::error::{AirwalkError, Result};
use crate::net::{LineReader, PacketConnector};
use crate::ptr::OffsetPtr;
use crate::state::StateFile;
use tracing::{debug, info, warn};

/// The command that switches KPC3-style appliances into their line
/// interpreter.
const BBS_COMMAND: &str = "BBS";

/// Long-form journal listing: known hosts with their via routes.
const JOURNAL_COMMAND: &str = "J L";

/// A prompt is any line whose trailing non-whitespace character is `>`.
/// Some remotes pad the prompt with spaces or NULs; strip those first.
pub fn is_prompt(line: &str) -> bool {
    line.trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
        .ends_with('>')
}

/// One discovery conversation with one remote station.
pub struct DiscoveryTask<'a> {
    state: &'a StateFile,
    connector: &'a dyn PacketConnector,
    target: Callsign,
}

impl<'a> DiscoveryTask<'a> {
    pub fn new(
        state: &'a StateFile,
        connector: &'a dyn PacketConnector,
        target: Callsign,
    ) -> Self {
        DiscoveryTask {
            state,
            connector,
            target,
        }
    }

    /// Connect and run the whole dialogue. Any error leaves the target
    /// un-visited so a later run retries it.
    pub fn run(&self) -> Result<()> {
        info!(target = %self.target, "connecting");
        let stream = self.connector.connect(&self.target)?;
        let mut reader = LineReader::new(stream);
        run_dialogue(self.state, &self.target, &mut reader)
    }
}

/// Drive an established connection through welcome drain, BBS entry, and
/// the journal listing. Split from [`DiscoveryTask::run`] so tests can
/// feed a scripted stream.
pub fn run_dialogue(
    state: &StateFile,
    target: &Callsign,
    reader: &mut LineReader,
) -> Result<()> {
    // Let the welcome banner play out until the remote falls silent.
    reader.drain()?;

    // Ask for command mode. Losing this exchange is not fatal; some
    // remotes drop straight into a prompt.
    reader.send_line(BBS_COMMAND)?;
    let mut prompted = false;
    while let Some(line) = reader.read_line()? {
        if is_prompt(&line) {
            prompted = true;
            break;
        }
    }
    if !prompted {
        warn!(target = %target, "no BBS prompt seen; proceeding optimistically");
    }

    reader.send_line(JOURNAL_COMMAND)?;
    let stats = parse_journal(state, reader)?;
    info!(
        target = %target,
        nodes = stats.nodes_recorded,
        edges = stats.edges_linked,
        "journal listing recorded"
    );

    let target_node = state.append_node(target)?;
    state.mark_visited(target_node)?;
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct JournalStats {
    pub nodes_recorded: usize,
    pub edges_linked: usize,
}

/// Parse the `J L` reply.
///
/// Each entry is a header line (destination, optionally followed by the
/// forward node traffic would be relayed toward) and an optional
/// `VIA hop...` continuation naming the route, to which the destination
/// is appended as the final element. A prompt line ends the listing.
fn parse_journal(state: &StateFile, reader: &mut LineReader) -> Result<JournalStats> {
    let mut stats = JournalStats::default();
    // Destination of the immediately preceding header line; a VIA line
    // binds to this and nothing older.
    let mut pending_dest: Option<Callsign> = None;

    while let Some(line) = reader.read_line()? {
        if is_prompt(&line) {
            break;
        }
        let candidates = scan_candidates(&line);
        if candidates.is_empty() {
            continue;
        }

        if candidates[0].eq_ignore_ascii_case("VIA") {
            if let Some(dest) = pending_dest.take() {
                record_via_route(state, &candidates[1..], dest, &mut stats)?;
            } else {
                debug!(line = %line, "VIA line without a preceding entry; skipped");
            }
            continue;
        }

        pending_dest = None;
        if candidates.len() > 2 {
            return Err(AirwalkError::NonConforming(format!(
                "{} callsigns in a journal header line",
                candidates.len()
            )));
        }

        let dest = match Callsign::parse(&candidates[0]) {
            Ok(dest) => dest,
            Err(e) => {
                debug!(token = %candidates[0], error = %e, "skipping malformed destination");
                continue;
            }
        };
        let dest_node = record_node(state, &dest, &mut stats)?;

        if let Some(forward_token) = candidates.get(1) {
            match Callsign::parse(forward_token) {
                Ok(forward) => {
                    let forward_node = record_node(state, &forward, &mut stats)?;
                    link(state, dest_node, forward_node, &mut stats)?;
                }
                Err(e) => {
                    debug!(token = %forward_token, error = %e, "skipping malformed forward node");
                }
            }
        }

        pending_dest = Some(dest);
    }

    Ok(stats)
}

/// Record `hops → destination` as a chain of edges.
fn record_via_route(
    state: &StateFile,
    hop_tokens: &[String],
    dest: Callsign,
    stats: &mut JournalStats,
) -> Result<()> {
    let mut route = Vec::with_capacity(hop_tokens.len() + 1);
    for token in hop_tokens {
        match Callsign::parse(token) {
            Ok(hop) => route.push(hop),
            Err(e) => debug!(token = %token, error = %e, "skipping malformed via hop"),
        }
    }
    route.push(dest);

    let mut previous: Option<OffsetPtr> = None;
    for hop in &route {
        let node = record_node(state, hop, stats)?;
        if let Some(from) = previous {
            link(state, from, node, stats)?;
        }
        previous = Some(node);
    }
    Ok(())
}

fn record_node(
    state: &StateFile,
    callsign: &Callsign,
    stats: &mut JournalStats,
) -> Result<OffsetPtr> {
    let before = state.len();
    let node = state.append_node(callsign)?;
    if state.len() > before {
        stats.nodes_recorded += 1;
    }
    Ok(node)
}

fn link(
    state: &StateFile,
    from: OffsetPtr,
    to: OffsetPtr,
    stats: &mut JournalStats,
) -> Result<()> {
    state.link_edge(from, to)?;
    stats.edges_linked += 1;
    Ok(())
}
