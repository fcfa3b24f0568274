use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

use crate::core::status::BotStatus;

/// Mirrors formatted log output to stdout and into the observer log history.
#[derive(Clone)]
pub(crate) struct FeedMakeWriter {
    pub status: Arc<BotStatus>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for FeedMakeWriter {
    type Writer = FeedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FeedWriter {
            status: self.status.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct FeedWriter {
    status: Arc<BotStatus>,
    suppress_stdout: bool,
}

impl std::io::Write for FeedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf);
        for line in msg.lines() {
            self.status.broadcaster().publish_log(line);
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}
