use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{BridgeError, Result};

use super::proto::{self, ReplyWord};

/// Blocking RouterOS API session over one TCP connection.
///
/// Covers only the command verbs the provisioner needs; this is not a
/// general RouterOS client. Blocking by design - drive it from a
/// spawn_blocking context (see `session.rs`).
pub struct ApiClient {
    stream: TcpStream,
}

impl ApiClient {
    /// Connect and authenticate. Uses the plain post-6.43 login exchange
    /// (credentials inside the `/login` sentence).
    pub fn connect(
        host: &str,
        port: u16,
        user: &str,
        pass: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let sockaddr = addr
            .to_socket_addrs()
            .map_err(|e| BridgeError::remote("router address", e))?
            .next()
            .ok_or_else(|| BridgeError::RemoteCall(format!("router address '{}' did not resolve", addr)))?;

        let stream = TcpStream::connect_timeout(&sockaddr, timeout)
            .map_err(|e| BridgeError::remote("router connect", e))?;
        stream.set_read_timeout(Some(timeout)).ok();
        stream.set_write_timeout(Some(timeout)).ok();

        let mut client = Self { stream };
        client.login(user, pass)?;
        Ok(client)
    }

    fn login(&mut self, user: &str, pass: &str) -> Result<()> {
        let (_, done) = self.run_sentences("/login", &[("name", user), ("password", pass)], &[])?;
        // a challenge in the done reply means the router expects the
        // pre-6.43 hashed login, which this client does not speak
        if done.contains_key("ret") {
            return Err(BridgeError::RemoteCall(
                "router offered challenge login; API login requires RouterOS 6.43+".to_string(),
            ));
        }
        Ok(())
    }

    /// Send one command sentence and collect every `!re` row until `!done`.
    ///
    /// `attributes` become `=key=value` words, `queries` become
    /// `?key=value` filter words. A `!trap` or `!fatal` reply is surfaced
    /// as a `RemoteCall` error carrying the router's message.
    pub fn run(
        &mut self,
        command: &str,
        attributes: &[(&str, &str)],
        queries: &[(&str, &str)],
    ) -> Result<Vec<HashMap<String, String>>> {
        let (rows, _) = self.run_sentences(command, attributes, queries)?;
        Ok(rows)
    }

    fn run_sentences(
        &mut self,
        command: &str,
        attributes: &[(&str, &str)],
        queries: &[(&str, &str)],
    ) -> Result<(Vec<HashMap<String, String>>, HashMap<String, String>)> {
        let mut words = vec![command.to_string()];
        for (key, value) in attributes {
            words.push(format!("={}={}", key, value));
        }
        for (key, value) in queries {
            words.push(format!("?{}={}", key, value));
        }

        proto::write_sentence(&mut self.stream, &words)
            .map_err(|e| BridgeError::remote(command, e))?;

        let mut rows = Vec::new();
        let mut done = HashMap::new();
        let mut trap: Option<String> = None;

        loop {
            let sentence =
                proto::read_sentence(&mut self.stream).map_err(|e| BridgeError::remote(command, e))?;
            match sentence.reply {
                ReplyWord::Re => rows.push(sentence.attributes),
                ReplyWord::Trap => {
                    trap = Some(
                        sentence
                            .attribute("message")
                            .unwrap_or("unspecified trap")
                            .to_string(),
                    );
                }
                ReplyWord::Fatal => {
                    return Err(BridgeError::RemoteCall(format!(
                        "{}: fatal: {}",
                        command,
                        sentence.attribute("message").unwrap_or("connection closed")
                    )));
                }
                ReplyWord::Done => {
                    done = sentence.attributes;
                    break;
                }
            }
        }

        match trap {
            Some(message) => Err(BridgeError::RemoteCall(format!("{}: {}", command, message))),
            None => Ok((rows, done)),
        }
    }
}
