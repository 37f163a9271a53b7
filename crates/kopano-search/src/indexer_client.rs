//! Indexer client (C2): a line-oriented protocol over a Unix domain
//! socket to the external full-text indexer.
//!
//! Grounded on `ECSearchClient`/`ECChannelClient`
//! (`provider/common/ECSearchClient.cpp`): one persistent-per-call
//! socket, `PROPS`/`SCOPE`/`FIND`/`SUGGEST`/`QUERY`/`SYNCRUN` commands
//! sent one-per-line, responses collected until a blank line. `do_cmd`
//! is the single chokepoint every other operation funnels through,
//! exactly as the original's `DoCmd`.

use std::collections::BTreeSet;
use std::io;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use kopano_core::{Error, Result};

/// Transport seam so the protocol logic can be exercised without a real
/// socket, by trait-bounding I/O at the connection boundary rather than
/// hardwiring a concrete stream type.
pub trait LineTransport: Send {
    fn send_line(&mut self, line: &str) -> io::Result<()>;
    /// Reads lines until a blank line (exclusive), or `Ok(None)` at EOF
    /// before any blank line was seen.
    fn recv_until_blank(&mut self) -> io::Result<Vec<String>>;
}

/// A Unix-socket transport, reconnecting per call as the original client
/// does ("the client is stateless across commands beyond socket
/// lifetime; callers reconnect opportunistically", §4.2).
pub struct UnixSocketTransport {
    socket_path: std::path::PathBuf,
    timeout: Duration,
    stream: Option<UnixStream>,
}

impl UnixSocketTransport {
    #[must_use]
    pub fn new(socket_path: impl Into<std::path::PathBuf>, timeout: Duration) -> Self {
        Self { socket_path: socket_path.into(), timeout, stream: None }
    }

    fn connected(&mut self) -> io::Result<&mut UnixStream> {
        if self.stream.is_none() {
            let stream = UnixStream::connect(&self.socket_path)?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().expect("just set"))
    }
}

impl LineTransport for UnixSocketTransport {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        use std::io::Write;
        let stream = self.connected()?;
        writeln!(stream, "{line}")
    }

    fn recv_until_blank(&mut self) -> io::Result<Vec<String>> {
        use std::io::BufRead;
        let stream = self.connected()?;
        let mut reader = io::BufReader::new(stream.try_clone()?);
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                return Ok(lines);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                return Ok(lines);
            }
            lines.push(trimmed.to_string());
        }
    }
}

/// One multi-field substring search term to FIND (§4.2), matching the
/// normaliser's `IndexTerm` field shape.
pub struct IndexedTerm {
    pub fields: BTreeSet<u16>,
    pub term: String,
}

pub struct IndexerClient<T: LineTransport> {
    transport: T,
}

impl<T: LineTransport> IndexerClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The single chokepoint every command funnels through: send one
    /// line, collect the response until a blank line.
    fn do_cmd(&mut self, command: &str) -> Result<Vec<String>> {
        self.transport.send_line(command).map_err(|e| Error::NetworkError(e.to_string()))?;
        self.transport.recv_until_blank().map_err(|e| Error::NetworkError(e.to_string()))
    }

    /// `PROPS` → the set of property ids the indexer can search.
    pub fn props(&mut self) -> Result<BTreeSet<u16>> {
        let resp = self.do_cmd("PROPS")?;
        let Some(first) = resp.first() else { return Ok(BTreeSet::new()) };
        first
            .split_whitespace()
            .map(|s| s.parse::<u16>().map_err(|_| Error::BadValue(format!("bad PROPS entry: {s}"))))
            .collect()
    }

    /// `SCOPE <server-guid> <store-guid> <folder-id>...`
    pub fn scope(&mut self, server_guid: &str, store_guid: &str, folders: &[u32]) -> Result<()> {
        let folder_list = folders.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
        let command = format!("SCOPE {server_guid} {store_guid} {folder_list}");
        expect_empty(self.do_cmd(&command)?)
    }

    /// `FIND <field-id...> : <term>` — AND-conjoined with any prior FIND
    /// on the same connection.
    pub fn find(&mut self, fields: &BTreeSet<u16>, term: &str) -> Result<()> {
        let field_list = fields.iter().map(u16::to_string).collect::<Vec<_>>().join(" ");
        let command = format!("FIND {field_list}:{term}");
        expect_empty(self.do_cmd(&command)?)
    }

    /// `SUGGEST` → one spell-suggestion line, leading space stripped.
    pub fn suggest(&mut self) -> Result<String> {
        let resp = self.do_cmd("SUGGEST")?;
        let first = resp.into_iter().next().ok_or_else(|| Error::BadValue("SUGGEST returned no lines".into()))?;
        Ok(first.strip_prefix(' ').map(str::to_string).unwrap_or(first))
    }

    /// `QUERY` → space-separated list of matching object ids.
    pub fn query(&mut self) -> Result<Vec<u32>> {
        let resp = self.do_cmd("QUERY")?;
        let Some(first) = resp.first() else { return Ok(Vec::new()) };
        first
            .split_whitespace()
            .map(|s| s.parse::<u32>().map_err(|_| Error::BadValue(format!("bad QUERY entry: {s}"))))
            .collect()
    }

    /// `SYNCRUN` — blocks until the indexer catches up.
    pub fn sync_run(&mut self) -> Result<()> {
        expect_empty(self.do_cmd("SYNCRUN")?)
    }

    /// Composes `SCOPE` → `FIND`* → `SUGGEST` → `QUERY` into one call,
    /// matching `ECSearchClient::Query(GUID*, GUID*, ...)`.
    pub fn run_query(
        &mut self,
        server_guid: &str,
        store_guid: &str,
        folders: &[u32],
        terms: &[IndexedTerm],
    ) -> Result<(Vec<u32>, String)> {
        self.scope(server_guid, store_guid, folders)?;
        for term in terms {
            self.find(&term.fields, &term.term)?;
        }
        let suggestion = self.suggest()?;
        let matches = self.query()?;
        Ok((matches, suggestion))
    }
}

fn expect_empty(resp: Vec<String>) -> Result<()> {
    if resp.is_empty() {
        Ok(())
    } else {
        Err(Error::BadValue(format!("expected empty response, got {} line(s)", resp.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// An in-memory transport that plays back a fixed script of responses
    /// keyed by command prefix, so protocol logic can be tested without a
    /// real socket.
    struct ScriptedTransport {
        sent: Vec<String>,
        responses: VecDeque<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Vec<String>>) -> Self {
            Self { sent: Vec::new(), responses: responses.into() }
        }
    }

    impl LineTransport for ScriptedTransport {
        fn send_line(&mut self, line: &str) -> io::Result<()> {
            self.sent.push(line.to_string());
            Ok(())
        }

        fn recv_until_blank(&mut self) -> io::Result<Vec<String>> {
            Ok(self.responses.pop_front().unwrap_or_default())
        }
    }

    #[test]
    fn query_parses_object_ids() {
        let transport = ScriptedTransport::new(vec![vec!["10 20 30".into()]]);
        let mut client = IndexerClient::new(transport);
        assert_eq!(client.query().unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn suggest_strips_leading_space() {
        let transport = ScriptedTransport::new(vec![vec![" did you mean foo".into()]]);
        let mut client = IndexerClient::new(transport);
        assert_eq!(client.suggest().unwrap(), "did you mean foo");
    }

    #[test]
    fn scope_rejects_nonempty_response() {
        let transport = ScriptedTransport::new(vec![vec!["unexpected".into()]]);
        let mut client = IndexerClient::new(transport);
        assert!(client.scope("srv", "store", &[1, 2]).is_err());
    }

    #[test]
    fn run_query_sends_scope_find_suggest_query_in_order() {
        let transport = ScriptedTransport::new(vec![
            vec![],                  // SCOPE
            vec![],                  // FIND
            vec!["suggestion".into()], // SUGGEST
            vec!["1 2".into()],      // QUERY
        ]);
        let mut client = IndexerClient::new(transport);
        let terms = vec![IndexedTerm { fields: BTreeSet::from([55u16]), term: "report".into() }];
        let (matches, suggestion) = client.run_query("srv-guid", "store-guid", &[1], &terms).unwrap();
        assert_eq!(matches, vec![1, 2]);
        assert_eq!(suggestion, "suggestion");
        assert_eq!(
            client.transport.sent,
            vec!["SCOPE srv-guid store-guid 1", "FIND 55:report", "SUGGEST", "QUERY"]
        );
    }
}
