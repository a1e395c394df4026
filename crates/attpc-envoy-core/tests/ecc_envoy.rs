//! ECC envoys against a mock GetECCServer.

use attpc_envoy_core::config::NetworkConfig;
use attpc_envoy_core::ecc::{
    startup_ecc_envoys, EccConfig, EccOperation, EccOperationResponse, EccStatusResponse,
};
use attpc_envoy_core::{EmbassyMessage, MessageKind, Topology};
use mockito::Matcher;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

fn soap(inner: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns="urn:ecc">
<SOAP-ENV:Body>{inner}</SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#
    )
}

fn state_body(state: i32) -> String {
    soap(&format!(
        "<ns:GetStateResponse><ErrorCode>0</ErrorCode><ErrorMessage></ErrorMessage>\
         <State>{state}</State><Transition>0</Transition></ns:GetStateResponse>"
    ))
}

fn config(url: &str) -> EccConfig {
    EccConfig::new(0, "e20009", &NetworkConfig::default(), &Topology::new(3)).with_url(url)
}

async fn next_of_kind(rx: &mut mpsc::Receiver<EmbassyMessage>, kind: MessageKind) -> EmbassyMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = rx.recv().await.expect("envoys hung up");
            if message.kind == kind {
                return message;
            }
        }
    })
    .await
    .expect("no message of the wanted kind")
}

#[tokio::test]
async fn test_status_and_transition_envoys_share_a_server() {
    let mut server = mockito::Server::new_async().await;
    let _state = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("GetState".to_string()))
        .with_status(200)
        .with_body(state_body(4))
        .expect_at_least(1)
        .create_async()
        .await;
    let breakup = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("<Breakup>".to_string()))
        .with_status(200)
        .with_body(soap(
            "<ns:BreakupResponse><ErrorCode>0</ErrorCode><ErrorMessage/><Text>done</Text></ns:BreakupResponse>",
        ))
        .expect(1)
        .create_async()
        .await;

    let (tx, mut rx) = mpsc::channel(32);
    let (cancel, _) = broadcast::channel(4);
    let (handles, switchboard) = startup_ecc_envoys(
        &[config(&server.url())],
        Duration::from_millis(50),
        Duration::from_secs(2),
        &tx,
        &cancel,
    );
    assert_eq!(handles.len(), 2);

    let status: EccStatusResponse = next_of_kind(&mut rx, MessageKind::EccStatus)
        .await
        .decode()
        .unwrap();
    assert_eq!(status.state, 4);

    switchboard[&0]
        .send(EmbassyMessage::compose(&EccOperation::Breakup, 0).unwrap())
        .await
        .unwrap();
    let reply: EccOperationResponse = next_of_kind(&mut rx, MessageKind::EccOperationResponse)
        .await
        .decode()
        .unwrap();
    assert_eq!(reply.error_code, 0);
    assert_eq!(reply.text, "done");
    breakup.assert_async().await;

    cancel.send(EmbassyMessage::compose_cancel()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_unreachable_server_reports_offline() {
    let (tx, mut rx) = mpsc::channel(32);
    let (cancel, _) = broadcast::channel(4);
    let (handles, _) = startup_ecc_envoys(
        &[config("http://127.0.0.1:9")],
        Duration::from_millis(50),
        Duration::from_millis(500),
        &tx,
        &cancel,
    );

    let status: EccStatusResponse = next_of_kind(&mut rx, MessageKind::EccStatus)
        .await
        .decode()
        .unwrap();
    assert_eq!(status, EccStatusResponse::default());

    cancel.send(EmbassyMessage::compose_cancel()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_failed_transition_still_replies() {
    let mut server = mockito::Server::new_async().await;
    let _state = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("GetState".to_string()))
        .with_status(200)
        .with_body(state_body(1))
        .create_async()
        .await;
    let _describe = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("<Describe>".to_string()))
        .with_status(500)
        .create_async()
        .await;

    let (tx, mut rx) = mpsc::channel(32);
    let (cancel, _) = broadcast::channel(4);
    let (handles, switchboard) = startup_ecc_envoys(
        &[config(&server.url())],
        Duration::from_secs(60),
        Duration::from_secs(2),
        &tx,
        &cancel,
    );

    switchboard[&0]
        .send(EmbassyMessage::compose(&EccOperation::Describe, 0).unwrap())
        .await
        .unwrap();
    let reply: EccOperationResponse = next_of_kind(&mut rx, MessageKind::EccOperationResponse)
        .await
        .decode()
        .unwrap();
    assert_eq!(reply.error_code, -1);
    assert!(!reply.error_message.is_empty());

    cancel.send(EmbassyMessage::compose_cancel()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}
