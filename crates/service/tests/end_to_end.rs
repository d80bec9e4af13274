use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tchannel_service::{Channel, ChannelEvent, ChannelOptions, EndpointHandler, TChannelError};

struct Echo;

#[async_trait::async_trait]
impl EndpointHandler for Echo {
    async fn call(&self, arg2: Bytes, arg3: Bytes) -> Result<(Bytes, Bytes), String> {
        Ok((arg2, arg3))
    }
}

struct NeverReplies;

#[async_trait::async_trait]
impl EndpointHandler for NeverReplies {
    async fn call(&self, _arg2: Bytes, _arg3: Bytes) -> Result<(Bytes, Bytes), String> {
        std::future::pending().await
    }
}

fn channel_at(port: u16) -> Channel {
    let addr = format!("127.0.0.1:{port}").parse().unwrap();
    Channel::new(ChannelOptions::new(format!("127.0.0.1:{port}"), addr))
}

#[tokio::test]
async fn simple_round_trip() -> Result<()> {
    let a = channel_at(14040);
    a.register("echo", Arc::new(Echo));
    a.listen().await?;

    let b = channel_at(14041);
    let (arg2, arg3) = b
        .send(
            "127.0.0.1:14040",
            Bytes::from_static(b"echo"),
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
            None,
        )
        .await?;

    assert_eq!(arg2, Bytes::from_static(b"k"));
    assert_eq!(arg3, Bytes::from_static(b"v"));

    a.quit().await;
    b.quit().await;
    Ok(())
}

#[tokio::test]
async fn no_such_endpoint_reports_not_found() -> Result<()> {
    let a = channel_at(14050);
    a.listen().await?;
    let mut a_events = a.subscribe();

    let b = channel_at(14051);
    let result = b
        .send(
            "127.0.0.1:14050",
            Bytes::from_static(b"missing"),
            Bytes::new(),
            Bytes::new(),
            None,
        )
        .await;

    assert!(matches!(result, Err(TChannelError::NoSuchEndpoint)));

    let saw_missing = loop {
        match a_events.recv().await? {
            ChannelEvent::EndpointMissing { name } => break name == Bytes::from_static(b"missing"),
            _ => continue,
        }
    };
    assert!(saw_missing);

    a.quit().await;
    b.quit().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn per_op_timeout_fires_without_a_response() -> Result<()> {
    let a = channel_at(14060);
    a.register("slow", Arc::new(NeverReplies));
    a.listen().await?;

    let b = channel_at(14061);
    let call = tokio::spawn({
        let b = b.clone();
        async move {
            b.send(
                "127.0.0.1:14060",
                Bytes::from_static(b"slow"),
                Bytes::new(),
                Bytes::new(),
                Some(Duration::from_millis(100)),
            )
            .await
        }
    });

    tokio::time::advance(Duration::from_millis(1100)).await;
    let result = call.await?;
    assert!(matches!(result, Err(TChannelError::Timeout)));

    a.quit().await;
    b.quit().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sustained_timeout_destroys_the_connection() -> Result<()> {
    let a = channel_at(14065);
    a.register("slow", Arc::new(NeverReplies));
    a.listen().await?;

    let b = channel_at(14066);
    let mut b_events = b.subscribe();

    let send_slow = |b: Channel| {
        tokio::spawn(async move {
            b.send(
                "127.0.0.1:14065",
                Bytes::from_static(b"slow"),
                Bytes::new(),
                Bytes::new(),
                Some(Duration::from_millis(100)),
            )
            .await
        })
    };

    // First call times out on the first sweep, which is what sets
    // `last_timeout_time` on the connection.
    let first = send_slow(b.clone());
    tokio::time::advance(Duration::from_millis(1100)).await;
    assert!(matches!(first.await?, Err(TChannelError::Timeout)));

    // No successful frame arrives before the second call is sent, so the
    // next sweep finds `last_timeout_time` still set and destroys the
    // connection outright instead of sweeping the tables again.
    let second = send_slow(b.clone());
    tokio::time::advance(Duration::from_millis(1100)).await;
    assert!(second.await?.is_err());

    let saw_close = loop {
        match b_events.recv().await? {
            ChannelEvent::SocketClose { .. } => break true,
            _ => continue,
        }
    };
    assert!(saw_close);

    a.quit().await;
    b.quit().await;
    Ok(())
}

#[tokio::test]
async fn quit_fails_pending_outbound_ops_with_shutdown() -> Result<()> {
    let a = channel_at(14070);
    a.register("slow", Arc::new(NeverReplies));
    a.listen().await?;

    let b = channel_at(14071);
    let call = tokio::spawn({
        let b = b.clone();
        async move {
            b.send(
                "127.0.0.1:14070",
                Bytes::from_static(b"slow"),
                Bytes::new(),
                Bytes::new(),
                None,
            )
            .await
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    b.quit().await;

    let result = call.await?;
    assert!(matches!(result, Err(TChannelError::Shutdown)));

    a.quit().await;
    Ok(())
}

#[tokio::test]
async fn quit_is_idempotent() -> Result<()> {
    let a = channel_at(14080);
    a.listen().await?;
    a.quit().await;
    a.quit().await;
    Ok(())
}

#[tokio::test]
async fn refuses_to_peer_with_self() -> Result<()> {
    let a = channel_at(14090);
    let result = a.add_peer("127.0.0.1:14090").await;
    assert!(matches!(result, Err(TChannelError::InvalidArg(_))));
    Ok(())
}
