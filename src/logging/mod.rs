//! Access and application logging to a file.
//!
//! `env_logger` formats records on the request threads and hands the bytes to
//! a channel; the `Logger` service drains the channel into the log file.

use std::io::{self, Write};

use async_trait::async_trait;
use env_logger::Builder;
use log::LevelFilter;
use pingora::{
    server::{ListenFds, ShutdownWatch},
    services::Service,
};
use tokio::{
    fs::{create_dir_all, metadata, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::config;

/// `Write` end handed to env_logger
pub struct ChannelWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    pub fn writer(&self) -> ChannelWriter {
        ChannelWriter {
            sender: self.sender.clone(),
        }
    }

    fn level(&self) -> LevelFilter {
        self.config.level.parse().unwrap_or(LevelFilter::Info)
    }

    /// Install the global logger; RUST_LOG still overrides the configured level
    pub fn init_env_logger(&self) {
        let mut builder = Builder::new();
        builder.filter_level(self.level());
        builder.parse_env(env_logger::Env::default());
        builder.target(env_logger::Target::Pipe(Box::new(self.writer())));
        if let Err(e) = builder.try_init() {
            eprintln!("Logger already initialised: {e}");
        }
    }

    async fn open(&self) -> io::Result<BufWriter<File>> {
        let path = std::path::Path::new(&self.config.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && metadata(parent).await.is_err() {
                create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        Ok(BufWriter::new(file))
    }
}

#[async_trait]
impl Service for Logger {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        let mut file = match self.open().await {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Unable to open log file {}: {e}", self.config.path);
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("Failed to write to log file: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // drain whatever arrived before shutdown
        while let Ok(data) = self.receiver.try_recv() {
            if file.write_all(&data).await.is_err() {
                break;
            }
        }
        if let Err(e) = file.flush().await {
            eprintln!("Failed to flush log file: {e}");
        }
    }

    fn name(&self) -> &'static str {
        "log writer"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}
