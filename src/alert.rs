use crate::config::AlertEmail;
use crate::diff::DiffResult;
use anyhow::{bail, Context, Result};
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, info};

const SUBJECT: &str = "File Integrity Alert";
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends change notifications to a plain SMTP relay.
#[derive(Debug, Clone)]
pub struct Mailer {
    cfg: AlertEmail,
}

impl Mailer {
    /// `None` unless alerts are configured and enabled.
    pub fn from_config(cfg: Option<&AlertEmail>) -> Option<Self> {
        cfg.filter(|c| c.enabled).map(|c| Self { cfg: c.clone() })
    }

    /// Notify about `diff` if it carries any change. Returns whether a mail went out.
    pub async fn notify(&self, diff: &DiffResult) -> Result<bool> {
        if diff.is_clean() {
            return Ok(false);
        }
        let body = serde_json::to_string_pretty(diff)?;
        timeout(IO_TIMEOUT, self.send(&body))
            .await
            .context("smtp session timed out")??;
        info!("Alert email sent to {}", self.cfg.recipient);
        Ok(true)
    }

    async fn send(&self, body: &str) -> Result<()> {
        let addr = format!("{}:{}", self.cfg.smtp_host, self.cfg.smtp_port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connect smtp {addr}"))?;
        let (rd, mut wr) = stream.into_split();
        let mut rd = BufReader::new(rd);

        expect_reply(&mut rd, 220).await?;
        command(&mut wr, &mut rd, "HELO integrity-monitor", 250).await?;
        command(&mut wr, &mut rd, &format!("MAIL FROM:<{}>", self.cfg.sender), 250).await?;
        command(&mut wr, &mut rd, &format!("RCPT TO:<{}>", self.cfg.recipient), 250).await?;
        command(&mut wr, &mut rd, "DATA", 354).await?;

        let now = OffsetDateTime::now_utc();
        let mut msg = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMessage-ID: <{}.{}@integrity-monitor>\r\n\
             MIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n",
            self.cfg.sender,
            self.cfg.recipient,
            SUBJECT,
            now.format(&Rfc2822)?,
            now.unix_timestamp_nanos(),
            std::process::id(),
        );
        for line in body.lines() {
            // dot-stuffing
            if line.starts_with('.') {
                msg.push('.');
            }
            msg.push_str(line);
            msg.push_str("\r\n");
        }
        msg.push_str(".\r\n");
        wr.write_all(msg.as_bytes()).await?;
        expect_reply(&mut rd, 250).await?;
        command(&mut wr, &mut rd, "QUIT", 221).await?;
        Ok(())
    }
}

async fn command<W, R>(wr: &mut W, rd: &mut R, line: &str, want: u16) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    R: AsyncBufReadExt + Unpin,
{
    debug!("smtp > {line}");
    wr.write_all(format!("{line}\r\n").as_bytes()).await?;
    expect_reply(rd, want).await
}

/// Read one (possibly multi-line) reply and check its status code.
async fn expect_reply<R: AsyncBufReadExt + Unpin>(rd: &mut R, want: u16) -> Result<()> {
    loop {
        let mut line = String::new();
        if rd.read_line(&mut line).await? == 0 {
            bail!("smtp server closed the connection");
        }
        debug!("smtp < {}", line.trim_end());
        let code: u16 = line
            .get(..3)
            .and_then(|c| c.parse().ok())
            .with_context(|| format!("malformed smtp reply {line:?}"))?;
        if line.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        if code != want {
            bail!("smtp server replied {}, expected {want}", line.trim_end());
        }
        return Ok(());
    }
}
