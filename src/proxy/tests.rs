use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::*;
use crate::args::ProxyMode;
use crate::error::{AppError, AppResult};
use crate::shutdown_handlers::shutdown_channel;

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

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

/// Answers every read with a fixed response.
async fn spawn_target() -> AppResult<(EndPoint, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let target = EndPoint::from(listener.local_addr()?);
    let handle = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buffer = vec![0_u8; 4096];
                while let Ok(read) = stream.read(&mut buffer).await {
                    if read == 0 || stream.write_all(RESPONSE).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    Ok((target, handle))
}

async fn connect_with_retry(port: u16) -> AppResult<TcpStream> {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return Ok(stream);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Err(AppError::validation("Proxy never started listening"))
}

async fn exchange(stream: &mut TcpStream, request: &[u8]) -> AppResult<Vec<u8>> {
    stream.write_all(request).await?;
    let mut response = vec![0_u8; RESPONSE.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut response))
        .await
        .map_err(|elapsed| AppError::validation(format!("No response: {}", elapsed)))??;
    Ok(response)
}

#[test]
fn null_filters_forward_both_directions() -> AppResult<()> {
    run_async_test(async {
        let (target, target_task) = spawn_target().await?;
        let proxy = TcpProxy::bind(
            "127.0.0.1",
            0,
            target,
            Arc::new(NullFilter),
            Arc::new(NullFilter),
        )
        .await?;
        let port = proxy.local_addr()?.port();
        let (shutdown_tx, _shutdown_rx) = shutdown_channel();
        let proxy_task = tokio::spawn(proxy.run(shutdown_tx.subscribe()));

        let mut client = connect_with_retry(port).await?;
        let response = exchange(&mut client, b"GET / HTTP/1.1\r\n\r\n").await?;
        if response != RESPONSE {
            return Err(AppError::validation(format!(
                "Unexpected response {:?}",
                String::from_utf8_lossy(&response)
            )));
        }

        if shutdown_tx.send(()).is_err() {
            return Err(AppError::validation("No proxy listening for shutdown"));
        }
        proxy_task.await?;
        target_task.abort();
        Ok(())
    })
}

#[test]
fn recording_proxy_writes_the_session() -> AppResult<()> {
    run_async_test(async {
        let (target, target_task) = spawn_target().await?;
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("recording.json");
        let port = free_port()?;
        let settings = ProxySettings {
            listen_host: "127.0.0.1".to_owned(),
            listen_port: port,
            target: target.clone(),
            mode: ProxyMode::Record,
            output: output.clone(),
            data_directory: dir.path().to_path_buf(),
        };

        let (shutdown_tx, _shutdown_rx) = shutdown_channel();
        let proxy_shutdown = shutdown_tx.clone();
        let proxy_task = tokio::spawn(async move { run_proxy(settings, &proxy_shutdown).await });

        let mut client = connect_with_retry(port).await?;
        exchange(&mut client, b"GET /hello?x=1 HTTP/1.1\r\nAccept: */*\r\n\r\n").await?;
        exchange(&mut client, b"GET /again HTTP/1.1\r\n\r\n").await?;
        drop(client);

        if shutdown_tx.send(()).is_err() {
            return Err(AppError::validation("No proxy listening for shutdown"));
        }
        proxy_task.await??;
        target_task.abort();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output)?)?;
        let paths: Vec<&str> = written
            .get("requests")
            .and_then(serde_json::Value::as_array)
            .map(|requests| {
                requests
                    .iter()
                    .filter_map(|request| request.pointer("/url/path"))
                    .filter_map(serde_json::Value::as_str)
                    .collect()
            })
            .unwrap_or_default();
        if paths != vec!["/hello", "/again"] {
            return Err(AppError::validation(format!("Unexpected recording {}", written)));
        }
        if written.pointer("/base_urls/0/port") != Some(&serde_json::json!(target.port)) {
            return Err(AppError::validation(format!("Unexpected base URL {}", written)));
        }
        if written.pointer("/requests/0/sleep_time_ms").is_some() {
            return Err(AppError::validation("First request cannot have a sleep time"));
        }
        Ok(())
    })
}
