use super::*;
use crate::directory::MemoryDirectory;
use mockall::mock;
use mockall::predicate::*;

mock! {
    pub Sender {}

    #[async_trait]
    impl PushSender for Sender {
        async fn send(&self, device: &DeviceToken, payload: &PushPayload) -> Result<(), PushError>;
    }
}

fn device(identity: &str, token: &str) -> DeviceToken {
    DeviceToken {
        identity: identity.to_string(),
        platform: "android".to_string(),
        token: token.to_string(),
    }
}

async fn directory_with(tokens: &[&str]) -> Arc<MemoryDirectory> {
    let directory = Arc::new(MemoryDirectory::default());
    for token in tokens {
        directory
            .register_device_token(device("alice", token))
            .await
            .unwrap();
    }
    directory
}

#[tokio::test]
async fn test_invalid_token_is_deregistered() {
    let directory = directory_with(&["good", "stale"]).await;
    let mut sender = MockSender::new();
    sender
        .expect_send()
        .withf(|device, _| device.token == "good")
        .times(1)
        .returning(|_, _| Ok(()));
    sender
        .expect_send()
        .withf(|device, _| device.token == "stale")
        .times(1)
        .returning(|_, _| Err(PushError::InvalidToken));

    let dispatcher = NotificationDispatcher::new(directory.clone(), Arc::new(sender));
    let delivered = dispatcher
        .notify("alice", &PushPayload::incoming_call("CA1", "+15550100"))
        .await;
    assert!(delivered);

    let remaining = directory.device_tokens("alice").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].token, "good");
}

#[tokio::test]
async fn test_no_devices_is_not_delivered() {
    let directory = directory_with(&[]).await;
    let mut sender = MockSender::new();
    sender.expect_send().never();
    let dispatcher = NotificationDispatcher::new(directory, Arc::new(sender));
    assert!(!dispatcher.notify("alice", &PushPayload::new("t", "b")).await);
}

#[tokio::test]
async fn test_transient_failure_keeps_token() {
    let directory = directory_with(&["t1", "t2"]).await;
    let mut sender = MockSender::new();
    sender
        .expect_send()
        .times(2)
        .returning(|_, _| Err(PushError::Other(anyhow::anyhow!("503 unavailable"))));

    let dispatcher = NotificationDispatcher::new(directory.clone(), Arc::new(sender));
    assert!(!dispatcher.notify("alice", &PushPayload::new("t", "b")).await);
    assert_eq!(directory.device_tokens("alice").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_payload_is_passed_through() {
    let directory = directory_with(&["t1"]).await;
    let payload = PushPayload::missed_call("CA9", "+15550100");
    let mut sender = MockSender::new();
    sender
        .expect_send()
        .with(always(), eq(payload.clone()))
        .times(1)
        .returning(|_, _| Ok(()));
    let dispatcher = NotificationDispatcher::new(directory, Arc::new(sender));
    assert!(dispatcher.notify("alice", &payload).await);
}
