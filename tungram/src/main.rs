// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `tungram [server|client]` — run one end of the tunnel.
//!
//! Authentication prompts (phone, login code, 2FA password, captcha) are
//! answered on stdin; an empty line cancels. Ctrl-C shuts down gracefully.

use log::{error, info};
use simple_logger::SimpleLogger;
use std::path::Path;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tungram_hostnet::windows::WindowsHostNet;
use tungram_tunnel::{Application, AuthPrompter, AuthRequest, Config, Role};

const CONFIG_FILE: &str = "config.json";

fn parse_role(arg: Option<&str>) -> Option<Role> {
    match arg {
        Some("server") => Some(Role::Server),
        Some("client") => Some(Role::Client),
        _ => None,
    }
}

/// Answers auth prompts from the terminal, one at a time.
async fn prompt_loop(mut requests: mpsc::Receiver<AuthRequest>) {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(request) = requests.recv().await {
        let question = match &request.payload {
            Some(payload) => format!("{} ({payload}): ", request.kind),
            None => format!("{}: ", request.kind),
        };
        if stdout.write_all(question.as_bytes()).await.is_err() {
            request.answer(None);
            continue;
        }
        let _ = stdout.flush().await;

        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                request.answer(Some(line.trim().to_string()));
            }
            _ => request.answer(None),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .expect("logger installs once");

    let args: Vec<String> = std::env::args().collect();
    let Some(role) = parse_role(args.get(1).map(String::as_str)) else {
        eprintln!("usage: {} [server|client]", args.first().map(String::as_str).unwrap_or("tungram"));
        return ExitCode::FAILURE;
    };

    let config = Config::load(Path::new(CONFIG_FILE));
    info!(
        "starting {role:?} [{:?}] from {}",
        config.transport_type, config.location_label
    );

    let (prompter, prompt_requests) = AuthPrompter::channel();
    tokio::spawn(prompt_loop(prompt_requests));

    let mut app = match Application::new(config, role, WindowsHostNet::new(), prompter) {
        Ok(app) => app,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    app.on_traffic_started(|| info!("first traffic through the tunnel"));

    let stop = app.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            stop.stop();
        }
    });

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
