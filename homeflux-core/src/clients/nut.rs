use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::agents::ups::UpsTransport;
use crate::config::UpsConfig;
use crate::error::{HomefluxError, HomefluxResult};

/// Live connection to one NUT (Network UPS Tools) server.
pub struct NutConnection {
    address: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl NutConnection {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    async fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = String::new();
        self.reader.read_line(&mut line).await?;
        Ok(line.trim_end().to_string())
    }
}

/// Client for the NUT text protocol over TCP.
pub struct NutTransport {
    username: String,
    password: Option<String>,
}

impl NutTransport {
    pub fn new(config: &UpsConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    async fn authenticate(&self, connection: &mut NutConnection) -> HomefluxResult<()> {
        let address = connection.address.clone();
        let expect_ok = |line: String| {
            if line.starts_with("OK") {
                Ok(())
            } else {
                Err(HomefluxError::connection(
                    &address,
                    format!("authentication rejected: {}", line),
                ))
            }
        };

        connection
            .send_line(&format!("USERNAME {}", self.username))
            .await
            .map_err(|e| HomefluxError::connection(&connection.address, e.to_string()))?;
        let line = connection
            .read_line()
            .await
            .map_err(|e| HomefluxError::connection(&connection.address, e.to_string()))?;
        expect_ok(line)?;

        if let Some(password) = &self.password {
            connection
                .send_line(&format!("PASSWORD {}", password))
                .await
                .map_err(|e| HomefluxError::connection(&connection.address, e.to_string()))?;
            let line = connection
                .read_line()
                .await
                .map_err(|e| HomefluxError::connection(&connection.address, e.to_string()))?;
            expect_ok(line)?;
        }

        Ok(())
    }
}

#[async_trait]
impl UpsTransport for NutTransport {
    type Handle = NutConnection;

    async fn connect(&self, address: &str, port: u16) -> HomefluxResult<NutConnection> {
        let stream = TcpStream::connect((address, port))
            .await
            .map_err(|e| HomefluxError::connection(address, e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        let mut connection = NutConnection {
            address: address.to_string(),
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        self.authenticate(&mut connection).await?;

        Ok(connection)
    }

    async fn list_vars(
        &self,
        handle: &mut NutConnection,
        device_name: &str,
    ) -> HomefluxResult<BTreeMap<String, String>> {
        let address = handle.address.clone();

        handle
            .send_line(&format!("LIST VAR {}", device_name))
            .await
            .map_err(|e| HomefluxError::agent(&address, e.to_string()))?;

        let mut vars = BTreeMap::new();
        loop {
            let line = handle
                .read_line()
                .await
                .map_err(|e| HomefluxError::agent(&address, e.to_string()))?;

            if line.starts_with("BEGIN LIST VAR") {
                continue;
            }
            if line.starts_with("END LIST VAR") {
                break;
            }
            if line.starts_with("ERR") {
                return Err(HomefluxError::agent(
                    &address,
                    format!("LIST VAR {} failed: {}", device_name, line),
                ));
            }
            if line.is_empty() {
                return Err(HomefluxError::agent(&address, "connection closed mid-list"));
            }

            if let Some((name, value)) = parse_var_line(&line) {
                vars.insert(name, value);
            }
        }

        Ok(vars)
    }

    async fn disconnect(&self, mut handle: NutConnection) {
        // Best effort; the server drops the socket either way.
        let _ = handle.send_line("LOGOUT").await;
        debug!(address = %handle.address, "closed NUT connection");
    }
}

/// Parse one `VAR <device> <name> "<value>"` response line.
fn parse_var_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(4, ' ');
    if parts.next() != Some("VAR") {
        return None;
    }
    let _device = parts.next()?;
    let name = parts.next()?;
    let value = parts.next()?.trim().trim_matches('"');
    Some((name.to_string(), value.to_string()))
}
