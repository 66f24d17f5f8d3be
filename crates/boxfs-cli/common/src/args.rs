// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use tracing_subscriber::prelude::*;

const BOXFS_LOG: &str = "BOXFS_LOG";

/// Command line flags for configuring logging and verbosity
#[derive(Debug, Clone, clap::Args)]
pub struct Logging {
    /// Make output more verbose, can be specified more than once
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Additionally log output to the provided file
    #[clap(long, global = true, env = "BOXFS_LOG_FILE", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<std::path::PathBuf>,

    /// Enables timestamp in logging (always enabled in file log)
    #[clap(long, global = true, value_parser = clap::builder::BoolishValueParser::new(), env = "BOXFS_LOG_TIMESTAMP")]
    pub timestamp: bool,
}

impl Logging {
    fn show_target(&self) -> bool {
        self.verbose > 2
    }

    fn filter_directives(&self) -> String {
        match self.verbose {
            0 => std::env::var(BOXFS_LOG).unwrap_or_else(|_| "boxfs=info,warn".to_string()),
            1 => "boxfs=debug,info".to_string(),
            2 => "boxfs=trace,info".to_string(),
            _ => "trace".to_string(),
        }
    }

    /// Configure logging based on the command line flags.
    pub fn configure(&self) {
        let directives = self.filter_directives();
        let env_filter = || tracing_subscriber::filter::EnvFilter::new(&directives);

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(self.show_target());
        let stderr_layer: Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync> =
            if self.timestamp {
                stderr_layer.boxed()
            } else {
                stderr_layer.without_time().boxed()
            };

        let file_layer = self.log_file.as_ref().and_then(|path| {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(self.show_target())
                    .with_filter(env_filter()),
            )
        });

        tracing_subscriber::registry()
            .with(stderr_layer.with_filter(env_filter()))
            .with(file_layer)
            .init();
    }
}
