//! Integration tests for the call lifecycle against a scripted relay.

use std::sync::Arc;
use std::time::Duration;

use batua::account::ENTRY_POINT_V07;
use batua::account::session::{self, AccountSession, EstimateState};
use batua::*;
use serde_json::json;

use crate::common::*;

fn context(transport: &Arc<MockTransport>) -> Arc<WalletContext> {
    init_tracing();
    WalletContext::new(config(transport).build().unwrap(), State::new(CHAIN_A))
}

fn calls() -> Vec<Call> {
    vec![
        Call::new(address(0x22)).value(U256::from(1)),
        Call::new(address(0x33)).data(vec![0x12, 0x34]),
    ]
}

// =============================================================================
// Opening
// =============================================================================

#[tokio::test]
async fn test_open_requires_signing_account() {
    let transport = MockTransport::new();
    let ctx = context(&transport);

    let err = AccountSession::open(&ctx, address(1), None, calls(), None).unwrap_err();
    assert_eq!(err.as_provider(), Some(&ProviderError::Unauthorized));

    // a read-only account cannot sign
    ctx.store().update(|state| {
        state.accounts.push(Account::smart_account(
            address(2),
            Some(Key::ReadOnly {
                key_type: KeyType::WebAuthnP256,
            }),
            "watcher",
        ))
    });
    let err = AccountSession::open(&ctx, address(2), None, calls(), None).unwrap_err();
    assert_eq!(err.as_provider(), Some(&ProviderError::Unauthorized));
}

#[tokio::test]
async fn test_open_requires_relay() {
    let transport = MockTransport::new();
    let config = Config::builder()
        .chain(ChainConfig::new(CHAIN_A, "Chain A").rpc(transport.clone()))
        .build()
        .unwrap();
    let ctx = WalletContext::new(config, State::new(CHAIN_A));
    let from = connect_passkey_account(&ctx);

    let err = AccountSession::open(&ctx, from, None, calls(), None).unwrap_err();
    assert!(matches!(
        err.as_provider(),
        Some(ProviderError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_open_checks_requested_chain() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);

    let err = AccountSession::open(&ctx, from, Some(CHAIN_B), calls(), None).unwrap_err();
    assert_eq!(err.as_provider(), Some(&ProviderError::ChainDisconnected));

    let session = AccountSession::open(&ctx, from, Some(CHAIN_A), calls(), None).unwrap();
    assert_eq!(session.chain_id(), CHAIN_A);
}

// =============================================================================
// Estimation
// =============================================================================

#[tokio::test]
async fn test_estimate_undeployed_account() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let estimate = session.estimate().await.unwrap();
    let op = &estimate.user_operation;

    assert_eq!(op.sender, from);
    assert_eq!(op.nonce, U256::from(5));
    assert_eq!(op.factory, Some(KERNEL_V3_1.meta_factory));
    assert_eq!(op.factory_data, Some(session.smart_account().factory_data()));
    assert_eq!(op.call_data, session.smart_account().encode_calls(&calls()));
    assert_eq!(op.max_fee_per_gas, U256::from(1_000_000_000u64));
    assert_eq!(op.call_gas_limit, U256::from(100_000));

    // (50k + 200k + 100k) gas at 1 gwei
    assert_eq!(estimate.cost, U256::from(350_000u64 * 1_000_000_000));
    assert_eq!(estimate.balance, U256::from(10u64.pow(18)));
    assert!(!estimate.sponsored);
    assert!(estimate.sufficient_balance);
    assert_eq!(estimate.cost_usd, None);

    let (_, nonce_params) = transport
        .calls()
        .into_iter()
        .find(|(m, _)| m == "eth_call")
        .unwrap();
    assert_eq!(nonce_params[0]["to"], json!(ENTRY_POINT_V07));
}

#[tokio::test]
async fn test_estimate_deployed_account_skips_factory() {
    let transport = MockTransport::new();
    script_relay(&transport);
    transport.clear("eth_getCode");
    transport.respond("eth_getCode", json!("0x6080"));
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let estimate = session.estimate().await.unwrap();
    assert_eq!(estimate.user_operation.factory, None);
    assert_eq!(estimate.user_operation.factory_data, None);
}

#[tokio::test]
async fn test_estimate_reports_fiat_cost() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);
    ctx.store().update(|state| state.price = Some(2000.0));

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let estimate = session.estimate().await.unwrap();
    let usd = estimate.cost_usd.unwrap();
    // 0.00035 ETH at $2000
    assert!((usd - 0.7).abs() < 1e-9, "{usd}");
}

#[tokio::test]
async fn test_sponsored_estimate() {
    let transport = MockTransport::new();
    script_relay(&transport);
    transport.clear("eth_getBalance");
    transport.respond("eth_getBalance", json!("0x0"));

    let sponsor = MockTransport::new();
    let paymaster = address(0x77);
    sponsor
        .respond(
            "pm_getPaymasterStubData",
            json!({
                "paymaster": paymaster,
                "paymasterData": "0x",
                "paymasterVerificationGasLimit": "0x186a0",
                "paymasterPostOpGasLimit": "0x1"
            }),
        )
        .respond(
            "pm_getPaymasterData",
            json!({ "paymaster": paymaster, "paymasterData": "0xbeef" }),
        );

    let config = Config::builder()
        .chain(
            ChainConfig::new(CHAIN_A, "Chain A")
                .rpc(transport.clone())
                .relay(transport.clone())
                .fee_sponsor(sponsor.clone(), Some(json!({ "sponsorshipPolicyId": "sp_1" }))),
        )
        .build()
        .unwrap();
    let ctx = WalletContext::new(config, State::new(CHAIN_A));
    let from = connect_passkey_account(&ctx);

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let estimate = session.estimate().await.unwrap();
    assert!(estimate.sponsored);
    assert!(estimate.sufficient_balance);
    assert_eq!(estimate.user_operation.paymaster, Some(paymaster));
    assert_eq!(
        estimate.user_operation.paymaster_data,
        Some(Bytes::from(vec![0xbe, 0xef]))
    );
    assert_eq!(
        estimate.user_operation.paymaster_verification_gas_limit,
        Some(U256::from(100_000))
    );

    let stub_params = sponsor.last_params("pm_getPaymasterStubData").unwrap();
    assert_eq!(stub_params[1], json!(ENTRY_POINT_V07));
    assert_eq!(stub_params[2], json!("0xaa36a7"));
    assert_eq!(stub_params[3], json!({ "sponsorshipPolicyId": "sp_1" }));
    assert_eq!(sponsor.count("pm_getPaymasterData"), 1);
}

#[tokio::test]
async fn test_estimate_failure_is_published() {
    let transport = MockTransport::new();
    script_relay(&transport);
    transport.clear("eth_estimateUserOperationGas");
    transport.respond_error("eth_estimateUserOperationGas", -32500, "AA21 didn't pay prefund");
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, Error::Rpc(RpcError::Rpc { code: -32500, .. })));
    assert!(matches!(session.current_estimate(), EstimateState::Failed(message) if message.contains("AA21")));
}

#[tokio::test]
async fn test_background_estimator_publishes_and_stops_on_chain_switch() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let mut estimates = session.estimates();
    let handle = session.spawn_estimator(Duration::from_millis(20));

    estimates.changed().await.unwrap();
    assert!(matches!(*estimates.borrow_and_update(), EstimateState::Ready(_)));

    ctx.store().update(|state| state.chain = CHAIN_B);
    tokio::time::timeout(Duration::from_secs(2), async {
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(session.current_estimate(), EstimateState::Aborted);
}

// =============================================================================
// Confirmation
// =============================================================================

#[tokio::test]
async fn test_confirm_signs_hash_and_submits() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);
    let authenticator = MockAuthenticator::new();

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let estimate = session.estimate().await.unwrap();
    let hash = session.confirm(authenticator.as_ref()).await.unwrap();
    assert_eq!(hash, USER_OP_HASH.parse::<B256>().unwrap());

    let signed = authenticator.signed();
    assert_eq!(signed.len(), 1);
    let expected = estimate.user_operation.hash(ENTRY_POINT_V07, CHAIN_A);
    assert_eq!(signed[0].challenge.as_ref(), expected.as_slice());
    assert_eq!(signed[0].credential_id.as_deref(), Some(CREDENTIAL_ID));
    assert_eq!(signed[0].rp_id.as_deref(), Some("localhost"));

    let submitted = transport.last_params("eth_sendUserOperation").unwrap();
    assert_eq!(submitted[1], json!(ENTRY_POINT_V07));
    assert_ne!(
        submitted[0]["signature"],
        json!(session.smart_account().dummy_signature())
    );
}

#[tokio::test]
async fn test_estimator_pauses_while_confirming() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);
    let authenticator = HeldAuthenticator::new();

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let mut estimates = session.estimates();
    let _estimator = session.spawn_estimator(Duration::from_millis(10));
    estimates.changed().await.unwrap();

    let confirm = tokio::spawn({
        let session = Arc::clone(&session);
        let authenticator = Arc::clone(&authenticator);
        async move { session.confirm(authenticator.as_ref()).await }
    });
    authenticator.wait_for_sign().await;

    // an estimate already in flight may still land
    tokio::time::sleep(Duration::from_millis(15)).await;
    let paused = transport.count("eth_estimateUserOperationGas");
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(transport.count("eth_estimateUserOperationGas"), paused);

    authenticator.release();
    confirm.await.unwrap().unwrap();
    assert_eq!(transport.count("eth_sendUserOperation"), 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        while transport.count("eth_estimateUserOperationGas") == paused {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_overlapping_confirm_is_refused() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);
    let authenticator = HeldAuthenticator::new();

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    session.estimate().await.unwrap();

    let first = tokio::spawn({
        let session = Arc::clone(&session);
        let authenticator = Arc::clone(&authenticator);
        async move { session.confirm(authenticator.as_ref()).await }
    });
    authenticator.wait_for_sign().await;

    let second = MockAuthenticator::new();
    let err = session.confirm(second.as_ref()).await.unwrap_err();
    assert!(matches!(err, Error::ConfirmInProgress), "{err:?}");
    assert!(second.signed().is_empty());

    authenticator.release();
    let hash = first.await.unwrap().unwrap();
    assert_eq!(hash, USER_OP_HASH.parse::<B256>().unwrap());
    assert_eq!(authenticator.signed().len(), 1);
    assert_eq!(transport.count("eth_sendUserOperation"), 1);
}

#[tokio::test]
async fn test_confirm_with_insufficient_balance_does_not_submit() {
    let transport = MockTransport::new();
    script_relay(&transport);
    transport.clear("eth_getBalance");
    transport.respond("eth_getBalance", json!("0x10"));
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);
    let authenticator = MockAuthenticator::new();

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let err = session.confirm(authenticator.as_ref()).await.unwrap_err();
    match err {
        Error::InsufficientBalance { required, available } => {
            assert_eq!(available, U256::from(16));
            assert!(required > available);
        }
        other => panic!("Expected InsufficientBalance, got: {:?}", other),
    }
    assert!(authenticator.signed().is_empty());
    assert_eq!(transport.count("eth_sendUserOperation"), 0);
}

#[tokio::test]
async fn test_confirm_after_chain_switch_fails() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    session.estimate().await.unwrap();
    ctx.store().update(|state| state.chain = CHAIN_B);

    let err = session
        .confirm(MockAuthenticator::new().as_ref())
        .await
        .unwrap_err();
    assert_eq!(err.as_provider(), Some(&ProviderError::ChainDisconnected));
    assert_eq!(transport.count("eth_sendUserOperation"), 0);
}

#[tokio::test]
async fn test_confirm_after_disconnect_fails() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    ctx.store().update(|state| state.accounts.clear());

    let err = session
        .confirm(MockAuthenticator::new().as_ref())
        .await
        .unwrap_err();
    assert_eq!(err.as_provider(), Some(&ProviderError::Unauthorized));
}

#[tokio::test]
async fn test_confirm_cancelled_is_user_rejected() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let from = connect_passkey_account(&ctx);
    let authenticator = MockAuthenticator::new();
    authenticator.cancel_all(true);

    let session = AccountSession::open(&ctx, from, None, calls(), None).unwrap();
    let err = session.confirm(authenticator.as_ref()).await.unwrap_err();
    assert!(err.is_user_rejected());
    assert_eq!(transport.count("eth_sendUserOperation"), 0);
}

// =============================================================================
// Status
// =============================================================================

#[tokio::test]
async fn test_calls_status_mapping() {
    let transport = MockTransport::new();
    script_relay(&transport);
    let ctx = context(&transport);
    let id: B256 = USER_OP_HASH.parse().unwrap();

    let pending = session::calls_status(&ctx, id, Duration::from_millis(30))
        .await
        .unwrap();
    assert_eq!(pending.status, StatusCode::PENDING);
    assert_eq!(pending.chain_id, CHAIN_A);
    assert!(pending.receipts.is_none());

    transport.clear("eth_getUserOperationReceipt");
    transport.respond("eth_getUserOperationReceipt", receipt(true));
    let confirmed = session::calls_status(&ctx, id, Duration::from_millis(30))
        .await
        .unwrap();
    assert_eq!(confirmed.status, StatusCode::CONFIRMED);
    assert_eq!(confirmed.transaction_hash(), Some(TX_HASH.parse().unwrap()));

    transport.clear("eth_getUserOperationReceipt");
    transport.respond("eth_getUserOperationReceipt", receipt(false));
    let reverted = session::calls_status(&ctx, id, Duration::from_millis(30))
        .await
        .unwrap();
    assert!(reverted.status.0 >= 500);
    assert!(reverted.status.is_failure());
}

#[tokio::test]
async fn test_calls_status_receipt_arrives_while_waiting() {
    let transport = MockTransport::new();
    transport
        .respond("eth_getUserOperationReceipt", serde_json::Value::Null)
        .respond("eth_getUserOperationReceipt", serde_json::Value::Null)
        .respond("eth_getUserOperationReceipt", receipt(true));
    let ctx = context(&transport);

    let status = session::calls_status(&ctx, USER_OP_HASH.parse().unwrap(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(status.status, StatusCode::CONFIRMED);
    assert_eq!(transport.count("eth_getUserOperationReceipt"), 3);
}

#[tokio::test]
async fn test_calls_status_transport_error_propagates() {
    let transport = MockTransport::new();
    transport.respond_error("eth_getUserOperationReceipt", -32000, "boom");
    let ctx = context(&transport);

    let err = session::calls_status(&ctx, USER_OP_HASH.parse().unwrap(), Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Rpc(_)));
}
