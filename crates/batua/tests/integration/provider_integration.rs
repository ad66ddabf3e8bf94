//! Integration tests for request dispatch, events and persistence.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use batua::*;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::TryRecvError;

use crate::common::*;

async fn provider_with(
    transport: &Arc<MockTransport>,
    implementation: Arc<MockImplementation>,
) -> Provider {
    init_tracing();
    Provider::builder(config(transport).build().unwrap())
        .implementation(implementation)
        .build()
        .await
        .unwrap()
}

fn provider_error(err: Error) -> ProviderError {
    match err {
        Error::Provider(e) => e,
        other => panic!("Expected provider error, got: {:?}", other),
    }
}

// =============================================================================
// Accounts
// =============================================================================

#[tokio::test]
async fn test_accounts_disconnected_without_accounts() {
    let transport = MockTransport::new();
    let provider = provider_with(&transport, Arc::new(MockImplementation::new(vec![]))).await;

    let err = provider
        .request(RawRequest::without_params("eth_accounts"))
        .await
        .unwrap_err();
    assert_eq!(provider_error(err), ProviderError::Disconnected);
}

#[tokio::test]
async fn test_request_accounts_loads_and_emits_events() {
    let transport = MockTransport::new();
    let implementation = Arc::new(MockImplementation::new(vec![address(0xab)]));
    let provider = provider_with(&transport, implementation.clone()).await;
    let mut events = provider.subscribe();

    let result = provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();
    assert_eq!(result, json!([address(0xab)]));

    assert_eq!(
        events.try_recv().unwrap(),
        ProviderEvent::Connect { chain_id: CHAIN_A }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        ProviderEvent::AccountsChanged(vec![address(0xab)])
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    let accounts = provider
        .request(RawRequest::without_params("eth_accounts"))
        .await
        .unwrap();
    assert_eq!(accounts, json!([address(0xab)]));

    // already connected: no second load
    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();
    assert_eq!(implementation.load_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_loaded_accounts_keep_order() {
    let transport = MockTransport::new();
    let loaded = vec![address(3), address(1), address(2)];
    let provider = provider_with(&transport, Arc::new(MockImplementation::new(loaded.clone()))).await;

    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();
    let accounts = provider
        .request(RawRequest::without_params("eth_accounts"))
        .await
        .unwrap();
    assert_eq!(accounts, json!(loaded));

    let state = provider.context().store().get();
    assert_eq!(state.accounts[0].account_type, AccountType::SmartAccount);
    assert!(state.accounts[0].key.is_none());
}

#[tokio::test]
async fn test_revoke_permissions_clears_accounts() {
    let transport = MockTransport::new();
    let provider =
        provider_with(&transport, Arc::new(MockImplementation::new(vec![address(1)]))).await;

    let err = provider
        .request(RawRequest::new("wallet_revokePermissions", json!([])))
        .await
        .unwrap_err();
    assert_eq!(provider_error(err), ProviderError::Disconnected);

    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();
    let mut events = provider.subscribe();
    let result = provider
        .request(RawRequest::new("wallet_revokePermissions", json!([{ "eth_accounts": {} }])))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
    assert_eq!(
        events.try_recv().unwrap(),
        ProviderEvent::AccountsChanged(vec![])
    );
    assert!(provider.context().store().get().accounts.is_empty());
}

// =============================================================================
// Chain
// =============================================================================

#[tokio::test]
async fn test_chain_id_and_switch() {
    let transport = MockTransport::new();
    let provider = provider_with(&transport, Arc::new(MockImplementation::new(vec![]))).await;
    let mut events = provider.subscribe();

    let chain = provider
        .request(RawRequest::without_params("eth_chainId"))
        .await
        .unwrap();
    assert_eq!(chain, json!("0xaa36a7"));

    provider.switch_chain(CHAIN_B).unwrap();
    assert_eq!(
        events.try_recv().unwrap(),
        ProviderEvent::ChainChanged { chain_id: CHAIN_B }
    );
    let chain = provider
        .request(RawRequest::without_params("eth_chainId"))
        .await
        .unwrap();
    assert_eq!(chain, json!("0x14a34"));

    assert!(matches!(
        provider.switch_chain(1),
        Err(ProviderError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_get_capabilities_per_chain() {
    let transport = MockTransport::new();
    let sponsor = MockTransport::new();
    let config = Config::builder()
        .chain(
            ChainConfig::new(CHAIN_A, "Chain A")
                .rpc(transport.clone())
                .relay(transport.clone())
                .fee_sponsor(sponsor.clone(), Some(json!({ "policy": "p" }))),
        )
        .chain(ChainConfig::new(CHAIN_B, "Chain B").rpc(transport.clone()))
        .build()
        .unwrap();
    let provider = Provider::builder(config)
        .implementation(Arc::new(MockImplementation::new(vec![])))
        .build()
        .await
        .unwrap();

    let capabilities = provider
        .request(RawRequest::new("wallet_getCapabilities", json!([])))
        .await
        .unwrap();
    assert_eq!(
        capabilities,
        json!({
            "0xaa36a7": {
                "atomicBatch": { "supported": true },
                "paymasterService": { "supported": true }
            },
            "0x14a34": {
                "atomicBatch": { "supported": true },
                "paymasterService": { "supported": false }
            }
        })
    );
}

// =============================================================================
// Sending
// =============================================================================

fn send_calls_request(from: Address, chain: ChainId) -> RawRequest {
    RawRequest::new(
        "wallet_sendCalls",
        json!([{
            "version": "1.0",
            "chainId": format!("0x{chain:x}"),
            "from": from,
            "calls": [
                { "to": address(0x22), "value": "0x1" },
                { "to": address(0x33), "data": "0x1234" }
            ]
        }]),
    )
}

#[tokio::test]
async fn test_send_calls_delegates_to_implementation() {
    let transport = MockTransport::new();
    let implementation = Arc::new(MockImplementation::new(vec![address(1)]));
    let provider = provider_with(&transport, implementation.clone()).await;
    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();

    let hash = provider
        .request(send_calls_request(address(1), CHAIN_A))
        .await
        .unwrap();
    assert_eq!(hash, json!(USER_OP_HASH));

    let sent = implementation.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, address(1));
    assert_eq!(sent[0].1.len(), 2);
    assert_eq!(sent[0].1[0].value, Some(U256::from(1)));
}

#[tokio::test]
async fn test_send_calls_unknown_account_is_unauthorized() {
    let transport = MockTransport::new();
    let implementation = Arc::new(MockImplementation::new(vec![address(1)]));
    let provider = provider_with(&transport, implementation.clone()).await;
    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();

    let err = provider
        .request(send_calls_request(address(9), CHAIN_A))
        .await
        .unwrap_err();
    assert_eq!(provider_error(err), ProviderError::Unauthorized);
    assert_eq!(implementation.sent_count(), 0);
    assert!(provider.context().queue().pending().is_empty());
}

#[tokio::test]
async fn test_send_calls_from_while_disconnected() {
    let transport = MockTransport::new();
    let implementation = Arc::new(MockImplementation::new(vec![address(1)]));
    let provider = provider_with(&transport, implementation.clone()).await;

    let err = provider
        .request(send_calls_request(address(1), CHAIN_A))
        .await
        .unwrap_err();
    assert_eq!(provider_error(err), ProviderError::Disconnected);
    assert_eq!(implementation.sent_count(), 0);

    let err = provider
        .request(RawRequest::new(
            "eth_sendTransaction",
            json!([{ "from": address(1), "to": address(0x22) }]),
        ))
        .await
        .unwrap_err();
    assert_eq!(provider_error(err), ProviderError::Disconnected);
}

#[tokio::test]
async fn test_send_calls_other_chain_is_chain_disconnected() {
    let transport = MockTransport::new();
    let implementation = Arc::new(MockImplementation::new(vec![address(1)]));
    let provider = provider_with(&transport, implementation.clone()).await;
    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();

    let err = provider
        .request(send_calls_request(address(1), CHAIN_B))
        .await
        .unwrap_err();
    assert_eq!(provider_error(err), ProviderError::ChainDisconnected);
    assert_eq!(implementation.sent_count(), 0);
}

#[tokio::test]
async fn test_send_calls_without_from_uses_first_account() {
    let transport = MockTransport::new();
    let implementation = Arc::new(MockImplementation::new(vec![address(4), address(5)]));
    let provider = provider_with(&transport, implementation.clone()).await;

    let request = RawRequest::new(
        "wallet_sendCalls",
        json!([{ "calls": [{ "to": address(0x22) }] }]),
    );
    let err = provider.request(request.clone()).await.unwrap_err();
    assert_eq!(provider_error(err), ProviderError::Disconnected);

    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();
    provider.request(request).await.unwrap();
    assert_eq!(implementation.sent.lock().unwrap()[0].0, address(4));
}

#[tokio::test]
async fn test_send_calls_invalid_params_names_path() {
    let transport = MockTransport::new();
    let provider = provider_with(&transport, Arc::new(MockImplementation::new(vec![]))).await;

    let err = provider
        .request(RawRequest::new(
            "wallet_sendCalls",
            json!([{ "calls": [{ "to": address(1) }, { "to": address(2), "value": "12" }] }]),
        ))
        .await
        .unwrap_err();
    match provider_error(err) {
        ProviderError::InvalidParams { path, value, .. } => {
            assert_eq!(path, "params.0.calls.1.value");
            assert_eq!(value, Some(json!("12")));
        }
        other => panic!("Expected InvalidParams, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_send_transaction_waits_for_receipt() {
    let transport = MockTransport::new();
    let id: B256 = USER_OP_HASH.parse().unwrap();
    let confirmed: UserOperationReceipt = serde_json::from_value(receipt(true)).unwrap();
    let implementation = Arc::new(
        MockImplementation::new(vec![address(1)]).with_statuses(vec![
            CallsStatus::pending(id, CHAIN_A),
            CallsStatus::pending(id, CHAIN_A),
            CallsStatus::from_receipt(id, CHAIN_A, confirmed),
        ]),
    );
    let provider = provider_with(&transport, implementation.clone()).await;
    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();

    let tx = provider
        .request(RawRequest::new(
            "eth_sendTransaction",
            json!([{ "from": address(1), "to": address(2), "value": "0x10" }]),
        ))
        .await
        .unwrap();
    assert_eq!(tx, json!(TX_HASH));
    assert_eq!(implementation.sent.lock().unwrap()[0].1.len(), 1);
}

#[tokio::test]
async fn test_send_transaction_times_out() {
    let transport = MockTransport::new();
    let config = config(&transport)
        .timeouts(Timeouts {
            confirmation_total: Duration::from_millis(80),
            ..fast_timeouts()
        })
        .build()
        .unwrap();
    let provider = Provider::builder(config)
        .implementation(Arc::new(MockImplementation::new(vec![address(1)])))
        .build()
        .await
        .unwrap();
    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();

    let err = provider
        .request(RawRequest::new(
            "eth_sendTransaction",
            json!([{ "from": address(1), "to": address(2) }]),
        ))
        .await
        .unwrap_err();
    assert!(matches!(provider_error(err), ProviderError::Timeout(_)));
}

#[tokio::test]
async fn test_get_calls_status_requires_accounts() {
    let transport = MockTransport::new();
    let provider =
        provider_with(&transport, Arc::new(MockImplementation::new(vec![address(1)]))).await;

    let request = RawRequest::new("wallet_getCallsStatus", json!([USER_OP_HASH]));
    let err = provider.request(request.clone()).await.unwrap_err();
    assert_eq!(provider_error(err), ProviderError::Disconnected);

    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();
    let status = provider.request(request).await.unwrap();
    assert_eq!(status["status"], 100);
    assert_eq!(status["atomic"], true);
    assert_eq!(status["version"], "1.0");
}

// =============================================================================
// Passthrough
// =============================================================================

#[tokio::test]
async fn test_passthrough_forwards_to_active_chain() {
    let transport = MockTransport::new();
    transport.respond("eth_blockNumber", json!("0x10"));
    let provider = provider_with(&transport, Arc::new(MockImplementation::new(vec![]))).await;

    let result = provider
        .request(RawRequest::without_params("eth_blockNumber"))
        .await
        .unwrap();
    assert_eq!(result, json!("0x10"));
    assert_eq!(transport.last_params("eth_blockNumber"), Some(json!([])));
}

#[tokio::test]
async fn test_passthrough_errors_propagate() {
    let transport = MockTransport::new();
    transport.respond_error("eth_getLogs", -32005, "limit exceeded");
    let provider = provider_with(&transport, Arc::new(MockImplementation::new(vec![]))).await;

    let err = provider
        .request(RawRequest::new("eth_getLogs", json!([{}])))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Rpc(RpcError::Rpc { code: -32005, .. })));
    assert_eq!(err.code(), -32005);
    assert_eq!(transport.count("eth_getLogs"), 1);
}

#[tokio::test]
async fn test_passthrough_reject_policy() {
    let transport = MockTransport::new();
    transport.respond("eth_blockNumber", json!("0x10"));
    let config = config(&transport)
        .passthrough(PassthroughPolicy::Reject)
        .build()
        .unwrap();
    let provider = Provider::builder(config)
        .implementation(Arc::new(MockImplementation::new(vec![])))
        .build()
        .await
        .unwrap();

    let err = provider
        .request(RawRequest::without_params("eth_blockNumber"))
        .await
        .unwrap_err();
    assert!(matches!(provider_error(err), ProviderError::UnsupportedMethod(_)));
    assert_eq!(transport.count("eth_blockNumber"), 0);
}

#[tokio::test]
async fn test_reserved_methods_are_unsupported() {
    let transport = MockTransport::new();
    let provider = provider_with(&transport, Arc::new(MockImplementation::new(vec![]))).await;

    for method in ["personal_sign", "eth_signTypedData_v4", "wallet_addEthereumChain", "batua_ping"] {
        let err = provider
            .request(RawRequest::new(method, json!([])))
            .await
            .unwrap_err();
        assert_eq!(err.code(), 4200, "{method}");
    }
    assert!(transport.calls().is_empty());
}

// =============================================================================
// Persistence
// =============================================================================

async fn wait_for_item(storage: &MemoryStorage) -> Value {
    for _ in 0..200 {
        if let Some(value) = storage.get_item(STORE_KEY).await.unwrap() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("state was never persisted");
}

#[tokio::test]
async fn test_state_is_persisted_and_restored() {
    let transport = MockTransport::new();
    let storage = Arc::new(MemoryStorage::new());

    let provider = Provider::builder(config(&transport).storage(storage.clone()).build().unwrap())
        .implementation(Arc::new(MockImplementation::new(vec![address(7)])))
        .build()
        .await
        .unwrap();
    provider
        .request(RawRequest::new("eth_requestAccounts", json!([])))
        .await
        .unwrap();

    let persisted = wait_for_item(&storage).await;
    assert_eq!(persisted["chain"], CHAIN_A);
    assert_eq!(persisted["accounts"][0]["address"], json!(address(7)));
    assert!(persisted.get("requestQueue").is_none());
    provider.destroy();

    let restored = Provider::builder(config(&transport).storage(storage.clone()).build().unwrap())
        .implementation(Arc::new(MockImplementation::new(vec![])))
        .build()
        .await
        .unwrap();
    let accounts = restored
        .request(RawRequest::without_params("eth_accounts"))
        .await
        .unwrap();
    assert_eq!(accounts, json!([address(7)]));
}

#[tokio::test]
async fn test_unknown_persisted_chain_falls_back_to_default() {
    let transport = MockTransport::new();
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set_item(STORE_KEY, json!({ "accounts": [], "chain": 999 }))
        .await
        .unwrap();

    let provider = Provider::builder(config(&transport).storage(storage).build().unwrap())
        .implementation(Arc::new(MockImplementation::new(vec![])))
        .build()
        .await
        .unwrap();
    assert_eq!(provider.context().chain(), CHAIN_A);
}

#[tokio::test]
async fn test_destroy_rejects_queued_requests() {
    let transport = MockTransport::new();
    let provider = Provider::create(config(&transport).build().unwrap())
        .await
        .unwrap();
    let ctx = Arc::clone(provider.context());

    let request = provider.request(RawRequest::new("eth_requestAccounts", json!([])));
    let destroy = async {
        next_pending(&ctx).await;
        provider.destroy();
    };
    let (result, ()) = tokio::join!(request, destroy);
    assert!(result.unwrap_err().is_user_rejected());
    assert!(ctx.queue().pending().is_empty());
}

#[tokio::test]
async fn test_price_source_feeds_state() {
    let transport = MockTransport::new();
    let provider = Provider::builder(config(&transport).build().unwrap())
        .implementation(Arc::new(MockImplementation::new(vec![])))
        .price_source(Arc::new(StaticPrice(2000.0)), Duration::from_secs(60))
        .build()
        .await
        .unwrap();

    for _ in 0..100 {
        if provider.context().store().get().price.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(provider.context().store().get().price, Some(2000.0));
}
