use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::communication::{
    Connection, ConnectionType, HandlerChain, ProcessState, WireMessage, WorkerProcessStatus,
    connect, read_message, send_message,
};
use crate::error::{AppError, AppResult, ConsoleError};

fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::validation(format!("Failed to build runtime: {}", err)))?;
    runtime.block_on(future)
}

fn free_port() -> AppResult<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

async fn start_console(port: u16) -> Arc<ConsoleCommunication> {
    let properties = ConsoleProperties::new(ConsoleAddress {
        host: "127.0.0.1".to_owned(),
        port,
    });
    ConsoleCommunication::start(
        properties,
        ConnectionLimits::default(),
        Arc::new(ErrorQueue::new()),
        Arc::new(ProcessStatusSet::new()),
    )
    .await
}

async fn wait_until<F>(mut condition: F, what: &'static str) -> AppResult<()>
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(AppError::validation(what))
}

async fn read_next(connection: &mut Connection) -> AppResult<WireMessage> {
    let message = tokio::time::timeout(
        Duration::from_secs(5),
        read_message::<_, WireMessage>(&mut connection.reader),
    )
    .await
    .map_err(|_elapsed| AppError::validation("Timed out reading message"))??;
    Ok(message)
}

#[derive(Default)]
struct SeenErrors {
    seen: Mutex<Vec<String>>,
}

impl SeenErrors {
    fn seen(&self) -> Vec<String> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }

    fn push(&self, entry: String) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(entry);
        }
    }
}

impl ErrorHandler for SeenErrors {
    fn handle_error_message(&self, message: &str, _title: Option<&str>) {
        self.push(format!("message:{}", message));
    }

    fn handle_resource_error_message(
        &self,
        resource_key: &str,
        _default_message: &str,
        _title: Option<&str>,
    ) {
        self.push(format!("resource:{}", resource_key));
    }

    fn handle_error(&self, error: AppError, _title: Option<&str>) {
        let key = if let AppError::Console(console_error) = &error {
            console_error.resource_key()
        } else {
            None
        };
        match key {
            Some(key) => self.push(format!("resource:{}", key)),
            None => self.push(format!("error:{}", error)),
        }
    }
}

#[test]
fn bind_failure_is_reported_once_and_leaves_console_deaf() -> AppResult<()> {
    run_async_test(async {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = occupied.local_addr()?.port();

        let console = start_console(port).await;
        if console.error_queue().pending() != 1 {
            return Err(AppError::validation(format!(
                "Expected one queued error, saw {}",
                console.error_queue().pending()
            )));
        }
        if console.local_addr().is_some() {
            return Err(AppError::validation("Console must not be bound"));
        }

        let handler = Arc::new(SeenErrors::default());
        console.error_queue().set_error_handler(Some(handler.clone()));
        console.send(&WireMessage::Reset);

        if handler.seen()
            != vec![
                "resource:localBindError.text".to_owned(),
                "resource:sendError.text".to_owned(),
            ]
        {
            return Err(AppError::validation(format!(
                "Unexpected errors: {:?}",
                handler.seen()
            )));
        }

        let fresh = free_port()?;
        console.properties().set_port(fresh);
        wait_until(
            || console.local_addr().map(|addr| addr.port()) == Some(fresh),
            "Console did not rebind after the port changed",
        )
        .await?;
        if handler.seen().len() != 2 {
            return Err(AppError::validation("Rebinding reported an error"));
        }
        console.shutdown().await;
        Ok(())
    })
}

#[test]
fn waiters_ride_out_a_reset() -> AppResult<()> {
    run_async_test(async {
        let console = start_console(free_port()?).await;
        let waiter = {
            let console = console.clone();
            tokio::spawn(async move { console.wait_for_message().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let next_port = free_port()?;
        console.properties().set_port(next_port);
        wait_until(
            || console.local_addr().map(|addr| addr.port()) == Some(next_port),
            "Console did not rebind",
        )
        .await?;

        let mut report = connect(&format!("127.0.0.1:{}", next_port), ConnectionType::Report).await?;
        let status = WorkerProcessStatus {
            identity: "w1".to_owned(),
            name: "worker".to_owned(),
            state: ProcessState::Running,
            total_threads: 2,
            running_threads: 2,
        };
        send_message(
            &mut report.writer,
            &WireMessage::WorkerStatusReport(status.clone()),
        )
        .await?;

        let received = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .map_err(|_elapsed| AppError::validation("Waiter never received the report"))??;
        if received != Some(WireMessage::WorkerStatusReport(status)) {
            return Err(AppError::validation(format!("Unexpected message: {:?}", received)));
        }
        console.shutdown().await;
        Ok(())
    })
}

#[test]
fn repeated_reset_drops_peers_and_keeps_listening() -> AppResult<()> {
    run_async_test(async {
        let console = start_console(free_port()?).await;
        let Some(addr) = console.local_addr() else {
            return Err(AppError::validation("Console did not bind"));
        };
        let mut old_agent = connect(&addr.to_string(), ConnectionType::Control).await?;
        wait_until(
            || console.connected_agents() == 1,
            "Agent never registered",
        )
        .await?;
        let waiter = {
            let console = console.clone();
            tokio::spawn(async move { console.wait_for_message().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        console.reset().await;
        console.reset().await;

        let mut buffer = [0_u8; 16];
        let read = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::io::AsyncReadExt::read(&mut old_agent.reader, &mut buffer),
        )
        .await
        .map_err(|_elapsed| AppError::validation("Old control peer was never closed"))??;
        if read != 0 {
            return Err(AppError::validation(format!(
                "Old control peer read {} bytes instead of EOF",
                read
            )));
        }
        if console.connected_agents() != 0 {
            return Err(AppError::validation(format!(
                "{} agents survived the reset",
                console.connected_agents()
            )));
        }
        let Some(rebound) = console.local_addr() else {
            return Err(AppError::validation("Console is deaf after two resets"));
        };

        let mut report = connect(&rebound.to_string(), ConnectionType::Report).await?;
        let status = WorkerProcessStatus {
            identity: "w2".to_owned(),
            name: "after-reset".to_owned(),
            state: ProcessState::Started,
            total_threads: 1,
            running_threads: 0,
        };
        send_message(
            &mut report.writer,
            &WireMessage::WorkerStatusReport(status.clone()),
        )
        .await?;

        let received = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .map_err(|_elapsed| AppError::validation("Waiter never received the report"))??;
        if received != Some(WireMessage::WorkerStatusReport(status)) {
            return Err(AppError::validation(format!("Unexpected message: {:?}", received)));
        }
        console.shutdown().await;
        Ok(())
    })
}

#[test]
fn shutdown_releases_waiters() -> AppResult<()> {
    run_async_test(async {
        let console = start_console(free_port()?).await;
        let waiter = {
            let console = console.clone();
            tokio::spawn(async move { console.wait_for_message().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        console.shutdown().await;

        let received = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .map_err(|_elapsed| AppError::validation("Waiter was not released"))??;
        if received.is_some() {
            return Err(AppError::validation("Expected no message after shutdown"));
        }
        if console.wait_for_message().await.is_some() {
            return Err(AppError::validation("Closed console produced a message"));
        }
        if !matches!(
            console.distribute_files(std::path::Path::new(".")),
            Err(ConsoleError::Closed)
        ) {
            return Err(AppError::validation("Expected distribution to be refused"));
        }
        Ok(())
    })
}

#[test]
fn process_control_broadcasts_commands() -> AppResult<()> {
    run_async_test(async {
        let console = start_console(free_port()?).await;
        let Some(addr) = console.local_addr() else {
            return Err(AppError::validation("Console did not bind"));
        };
        let mut agent = connect(&addr.to_string(), ConnectionType::Control).await?;
        wait_until(
            || console.connected_agents() == 1,
            "Agent never registered",
        )
        .await?;

        let control = console.process_control();
        control.start_worker_processes(Some("scenario.py".to_owned()));
        control.reset_worker_processes();
        control.stop_worker_processes();

        let expected = [
            WireMessage::Start(crate::communication::StartMessage {
                script_file: Some("scenario.py".to_owned()),
            }),
            WireMessage::Reset,
            WireMessage::Stop,
        ];
        for message in expected {
            let received = read_next(&mut agent).await?;
            if received != message {
                return Err(AppError::validation(format!(
                    "Expected {}, got {}",
                    message.kind(),
                    received.kind()
                )));
            }
        }
        console.shutdown().await;
        Ok(())
    })
}

#[test]
fn distribute_files_clears_then_sends_each_file() -> AppResult<()> {
    run_async_test(async {
        let source = tempfile::tempdir()?;
        std::fs::write(source.path().join("a.txt"), b"alpha")?;
        std::fs::create_dir_all(source.path().join("lib"))?;
        std::fs::write(source.path().join("lib").join("b.txt"), b"beta")?;

        let console = start_console(free_port()?).await;
        let Some(addr) = console.local_addr() else {
            return Err(AppError::validation("Console did not bind"));
        };
        let mut agent = connect(&addr.to_string(), ConnectionType::Control).await?;
        wait_until(
            || console.connected_agents() == 1,
            "Agent never registered",
        )
        .await?;

        let count = console.distribute_files(source.path())?;
        if count != 2 {
            return Err(AppError::validation(format!("Unexpected count: {}", count)));
        }

        if read_next(&mut agent).await? != WireMessage::ClearCache {
            return Err(AppError::validation("Expected clear_cache first"));
        }
        let mut paths = Vec::new();
        for _ in 0..2 {
            match read_next(&mut agent).await? {
                WireMessage::DistributeFile(file) => paths.push(file.relative_path),
                other => {
                    return Err(AppError::validation(format!(
                        "Unexpected message: {}",
                        other.kind()
                    )));
                }
            }
        }
        if paths != vec!["a.txt".to_owned(), "lib/b.txt".to_owned()] {
            return Err(AppError::validation(format!("Unexpected paths: {:?}", paths)));
        }
        console.shutdown().await;
        Ok(())
    })
}

#[test]
fn message_loop_feeds_process_status() -> AppResult<()> {
    run_async_test(async {
        let console = start_console(free_port()?).await;
        let Some(addr) = console.local_addr() else {
            return Err(AppError::validation("Console did not bind"));
        };

        let mut handlers = HandlerChain::new();
        handlers.add(ProcessStatusHandler::new(console.process_status().clone()));
        let message_loop = {
            let console = console.clone();
            tokio::spawn(async move { console.run_message_loop(&handlers).await })
        };

        let mut report = connect(&addr.to_string(), ConnectionType::Report).await?;
        send_message(
            &mut report.writer,
            &WireMessage::AgentStatusReport(crate::communication::AgentProcessStatus {
                identity: "agent-1".to_owned(),
                name: "loadgen-1".to_owned(),
                state: ProcessState::Running,
            }),
        )
        .await?;
        wait_until(
            || console.process_status().agent_count() == 1,
            "Agent status never arrived",
        )
        .await?;

        console.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), message_loop)
            .await
            .map_err(|_elapsed| AppError::validation("Message loop did not stop"))??;
        Ok(())
    })
}
