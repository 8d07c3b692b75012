use crate::connection::Connection;
use crate::error::{Result, SolarMaxError};
use crate::frame::{build_query, parse_response, response_code, Address};

/// Queries one inverter over its own `Connection`.
///
/// `query` never fails: a lost link, a bad checksum or an undecodable value all
/// come back as `None`, so a poll loop can keep running unattended.
/// `try_query` keeps the cause for callers that want it.
pub struct InverterClient {
    pub name: String,
    pub poll_ok: u64,
    pub poll_errors: u64,
    address: Address,
    connection: Connection,
}

impl InverterClient {
    pub fn new(connection: Connection, device_index: u8) -> Self {
        let name = format!(
            "{}:{}#{}",
            connection.host(),
            connection.port(),
            device_index
        );
        Self {
            name,
            poll_ok: 0,
            poll_errors: 0,
            address: Address(device_index),
            connection,
        }
    }

    /// Connects to `host:port` (after a successful ping) and addresses
    /// device `device_index` on that link.
    pub fn connect(host: &str, port: u16, device_index: u8) -> Result<Self> {
        let mut client = InverterClient::new(Connection::new(host, port), device_index);
        client.open()?;
        Ok(client)
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn open(&mut self) -> Result<()> {
        self.connection.connect()
    }

    /// Blocks until the inverter is back; see `Connection::reconnect`.
    pub fn reconnect(&mut self) -> Result<()> {
        self.connection.reconnect()
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    /// Drops a link whose byte stream can no longer be trusted to line up
    /// with our requests; the next `reconnect()` starts from a clean socket.
    fn drop_link(&mut self, cause: &SolarMaxError) {
        warn!("{}: out of sync with the inverter ({}), dropping connection", self.name, cause);
        self.connection.disconnect();
    }

    pub fn try_query(&mut self, code: &str) -> Result<Option<u32>> {
        let query = build_query(self.address, code);
        trace!("{}: TX {}", self.name, query);

        let raw = self.connection.exchange(query.as_bytes())?;
        trace!("{}: RX {}", self.name, String::from_utf8_lossy(&raw));

        let value = match parse_response(&raw) {
            Ok(value) => value,
            Err(e) => {
                // a checksum failure or a cut-off frame leaves the rest of the answer unread
                if matches!(e, SolarMaxError::ChecksumMismatch { .. }) || raw.last() != Some(&b'}') {
                    self.drop_link(&e);
                }
                return Err(e);
            }
        };

        if let Some(echoed) = std::str::from_utf8(&raw).ok().and_then(response_code) {
            if echoed != code {
                let e = SolarMaxError::malformed(format!(
                    "asked for {} but the answer is for {}",
                    code, echoed
                ));
                self.drop_link(&e);
                return Err(e);
            }
        }
        Ok(value)
    }

    pub fn query(&mut self, code: &str) -> Option<u32> {
        match self.try_query(code) {
            Ok(value) => {
                self.poll_ok += 1;
                if value.is_none() {
                    debug!("{}: {}: no data", self.name, code);
                }
                value
            }
            Err(e) if e.is_transient() => {
                self.poll_errors += 1;
                error!("{}: {}: query failed: {}", self.name, code, e);
                None
            }
            Err(e) => {
                debug!("{}: {}: {}", self.name, code, e);
                None
            }
        }
    }
}
