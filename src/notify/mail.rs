/* This file is part of ringwatch
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! SMTP notification channel.

use std::time::Duration;

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, extension::ClientId},
    Message, SmtpTransport, Transport,
};
use log::debug;

use crate::{Error, Result};

/// Placeholder in `from` replaced by the sending host's name
const HOSTNAME_SUFFIX: &str = "@hostname";

/// SMTP relay the report mails go through
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailConfig {
    pub address: String,
    pub port: u16,
    /// Log in with `username` and `password`
    pub auth: bool,
    pub username: String,
    pub password: String,
    /// Sender, a trailing `@hostname` becomes `@<local hostname>`
    pub from: String,
    pub to: Vec<String>,
    pub disabled: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 25,
            auth: false,
            username: String::new(),
            password: String::new(),
            from: format!("ringwatch{}", HOSTNAME_SUFFIX),
            to: vec![],
            disabled: false,
        }
    }
}

impl MailConfig {
    pub fn sender(&self, hostname: &str) -> String {
        match self.from.strip_suffix(HOSTNAME_SUFFIX) {
            Some(user) => format!("{}@{}", user, hostname),
            None => self.from.clone(),
        }
    }

    fn message(&self, text: &str, hostname: &str) -> Result<Message> {
        let mut builder = Message::builder()
            .from(mailbox(&self.sender(hostname))?)
            .subject(format!("Message from ringwatch at {}", hostname))
            .header(ContentType::TEXT_HTML);

        for to in self.to.iter().filter(|t| !t.trim().is_empty()) {
            builder = builder.to(mailbox(to.trim())?);
        }

        builder.body(text.to_string()).map_err(|e| Error::MailError(e.to_string()))
    }

    /// Send one mail to every recipient. The SMTP session is blocking and
    /// runs on the blocking thread pool.
    pub async fn send(&self, text: &str, hostname: &str, timeout: Duration) -> Result<bool> {
        if self.to.iter().all(|t| t.trim().is_empty()) {
            return Err(Error::MailError("recipient list is empty".to_string()))
        }

        let email = self.message(text, hostname)?;

        let mut builder = SmtpTransport::builder_dangerous(self.address.as_str())
            .port(self.port)
            .timeout(Some(timeout))
            .hello_name(ClientId::Domain(hostname.to_string()));
        if self.auth {
            builder = builder.credentials(Credentials::new(self.username.clone(), self.password.clone()));
        }
        let transport = builder.build();

        match smol::unblock(move || transport.send(&email)).await {
            Ok(_) => {
                debug!(target: "ringwatch::notify::mail", "Mail relayed by {}:{}", self.address, self.port);
                Ok(true)
            }
            Err(e) => Err(Error::MailError(e.to_string())),
        }
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address.parse::<Mailbox>().map_err(|e| Error::MailError(format!("bad address {}: {}", address, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{AsyncBufReadExt, AsyncWriteExt};
    use smol::{io::BufReader, net::TcpListener};

    /// Minimal SMTP server. Returns the commands and the message data.
    async fn smtp_sink(listener: TcpListener) -> (Vec<String>, String) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream.clone());
        let mut writer = stream;
        let (mut commands, mut data, mut in_data) = (vec![], String::new(), false);

        writer.write_all(b"220 sink ESMTP\r\n").await.unwrap();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break
            }

            if in_data {
                if line == ".\r\n" {
                    in_data = false;
                    writer.write_all(b"250 queued\r\n").await.unwrap();
                } else {
                    data.push_str(&line);
                }
                continue
            }

            let cmd = line.trim_end().to_string();
            let verb = cmd.split_whitespace().next().unwrap_or("").to_uppercase();
            commands.push(cmd);
            match verb.as_str() {
                "DATA" => {
                    in_data = true;
                    writer.write_all(b"354 go ahead\r\n").await.unwrap();
                }
                "QUIT" => {
                    writer.write_all(b"221 bye\r\n").await.unwrap();
                    break
                }
                _ => writer.write_all(b"250 ok\r\n").await.unwrap(),
            }
        }

        (commands, data)
    }

    #[test]
    fn sender_takes_local_hostname() {
        let cfg = MailConfig::default();
        assert_eq!(cfg.sender("node-a.example"), "ringwatch@node-a.example");

        let cfg = MailConfig { from: "ops@example.org".into(), ..Default::default() };
        assert_eq!(cfg.sender("node-a.example"), "ops@example.org");
    }

    #[test]
    fn empty_recipients_is_an_error() {
        smol::block_on(async {
            let cfg = MailConfig { to: vec!["".into()], ..Default::default() };
            let res = cfg.send("x", "node-a.example", Duration::from_secs(1)).await;
            assert!(matches!(res, Err(Error::MailError(_))));
        });
    }

    #[test]
    fn bad_recipient_is_an_error() {
        let cfg = MailConfig { to: vec!["not an address".into()], ..Default::default() };
        assert!(matches!(cfg.message("x", "node-a.example"), Err(Error::MailError(_))));
    }

    #[test]
    fn mail_is_relayed_over_smtp() {
        smol::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let sink = smol::spawn(smtp_sink(listener));

            let cfg = MailConfig {
                port,
                to: vec!["alice@example.org".into(), "bob@example.org".into()],
                ..Default::default()
            };
            assert!(cfg.send("disk full", "node-a.example", Duration::from_secs(5)).await.unwrap());

            let (commands, data) = sink.await;
            assert_eq!(commands[0], "EHLO node-a.example");
            assert!(commands.iter().any(|c| c.starts_with("MAIL FROM:<ringwatch@node-a.example>")));
            assert!(commands.iter().any(|c| c.starts_with("RCPT TO:<alice@example.org>")));
            assert!(commands.iter().any(|c| c.starts_with("RCPT TO:<bob@example.org>")));
            assert!(data.contains("Subject: Message from ringwatch at node-a.example"));
            assert!(data.contains("disk full"));
        });
    }
}
