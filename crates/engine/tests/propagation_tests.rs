//! End-to-end propagation tests against the memory adapter
//!
//! Each test uses its own id-space so tests can run in parallel against the
//! process-wide facade registry.

use xwrap_engine::{
    CancelReason, Error, MemoryAdapter, MemoryStats, Result, TransactionOptions, XWrap, XWrapConfig,
};

fn memory(space: &str) -> XWrap<MemoryAdapter> {
    XWrap::initialize(&XWrapConfig::new("memory", space)).unwrap()
}

fn stats(xwrap: &XWrap<MemoryAdapter>) -> MemoryStats {
    xwrap.adapter().stats()
}

// ============================================================================
// Counter scenario
// ============================================================================

#[tokio::test]
async fn test_success_opens_and_commits_once() {
    let xwrap = memory("prop-success");

    let value = xwrap
        .transaction(|ctx| async move {
            ctx.client().query("INSERT INTO t VALUES (1)");
            Ok(ctx.client().clone())
        })
        .await
        .unwrap();

    let s = stats(&xwrap);
    assert_eq!((s.opens, s.commits, s.rollbacks), (1, 1, 0));
    assert_eq!(value.journal(), vec!["BEGIN", "INSERT INTO t VALUES (1)", "COMMIT"]);
}

#[tokio::test]
async fn test_failure_rolls_back_with_same_error() {
    let xwrap = memory("prop-failure");

    let err = xwrap
        .transaction(|_ctx| async move { Err::<(), _>(Error::work("constraint violated")) })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Work(_)));
    assert_eq!(err.to_string(), "constraint violated");
    let s = stats(&xwrap);
    assert_eq!((s.opens, s.commits, s.rollbacks), (1, 0, 1));
}

// ============================================================================
// Nesting
// ============================================================================

async fn insert_audit_row(xwrap: &XWrap<MemoryAdapter>) -> Result<u64> {
    xwrap
        .transaction(|ctx| async move {
            ctx.client().query("INSERT INTO audit");
            Ok(ctx.client().id())
        })
        .await
}

#[tokio::test]
async fn test_nested_functions_share_one_transaction() {
    let xwrap = memory("prop-nested");
    let inner = xwrap.clone();

    let (outer_id, inner_id, journal) = xwrap
        .transaction(|ctx| async move {
            ctx.client().query("INSERT INTO orders");
            let inner_id = insert_audit_row(&inner).await?;
            Ok((ctx.client().id(), inner_id, ctx.client().journal()))
        })
        .await
        .unwrap();

    assert_eq!(outer_id, inner_id);
    assert_eq!(journal, vec!["BEGIN", "INSERT INTO orders", "INSERT INTO audit"]);
    let s = stats(&xwrap);
    assert_eq!((s.clients, s.opens, s.commits), (1, 1, 1));
}

#[tokio::test]
async fn test_new_inside_auto_opens_second_transaction() {
    let xwrap = memory("prop-new");
    let inner = xwrap.clone();

    let (outer_id, inner_id) = xwrap
        .transaction_of(XWrap::<MemoryAdapter>::AUTO, |ctx| async move {
            let inner_id = inner
                .transaction_of(XWrap::<MemoryAdapter>::NEW, |ctx| async move { Ok(ctx.client().id()) })
                .await?;
            Ok((ctx.client().id(), inner_id))
        })
        .await
        .unwrap();

    assert_ne!(outer_id, inner_id);
    let s = stats(&xwrap);
    assert_eq!((s.opens, s.commits), (2, 2));
}

#[tokio::test]
async fn test_sub_without_ambient_fails() {
    let xwrap = memory("prop-sub-none");
    let err = xwrap
        .transaction_of(XWrap::<MemoryAdapter>::SUB, |_ctx| async move { Ok(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoAmbientTransaction { .. }));
    assert_eq!(stats(&xwrap), MemoryStats::default());
}

#[tokio::test]
async fn test_sub_uses_savepoints() {
    let xwrap = memory("prop-sub");
    let inner = xwrap.clone();

    let journal = xwrap
        .transaction(|ctx| async move {
            inner
                .transaction_of(XWrap::<MemoryAdapter>::SUB, |sub| async move {
                    sub.client().query("UPDATE a");
                    Ok(())
                })
                .await?;
            let failed = inner
                .transaction_of(XWrap::<MemoryAdapter>::SUB, |sub| async move {
                    sub.client().query("UPDATE b");
                    Err::<(), _>(Error::work("bad row"))
                })
                .await;
            assert!(failed.is_err());
            Ok(ctx.client().clone())
        })
        .await
        .unwrap()
        .journal();

    assert_eq!(
        journal,
        vec![
            "BEGIN",
            "SAVEPOINT sp1",
            "UPDATE a",
            "RELEASE SAVEPOINT sp1",
            "SAVEPOINT sp1",
            "UPDATE b",
            "ROLLBACK TO SAVEPOINT sp1",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_nested_failure_rolls_back_outer() {
    let xwrap = memory("prop-nested-failure");
    let inner = xwrap.clone();

    let err = xwrap
        .transaction(|_ctx| async move {
            // The caller swallows the nested failure; the outer still rolls back
            let _ = inner
                .transaction(|_ctx| async move { Err::<(), _>(Error::work("nested")) })
                .await;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RollbackOnly { .. }));
    let s = stats(&xwrap);
    assert_eq!((s.opens, s.commits, s.rollbacks), (1, 0, 1));
}

// ============================================================================
// Id-spaces and tasks
// ============================================================================

#[tokio::test]
async fn test_id_spaces_never_cross_match() {
    let a = memory("prop-space-a");
    let b = memory("prop-space-b");
    let (inner_a, inner_b) = (a.clone(), b.clone());

    a.transaction(|_ctx| async move {
        inner_b
            .transaction(|ctx| async move {
                assert!(!ctx.transaction().is_borrowed());
                Ok(())
            })
            .await?;
        let a_ambient = inner_a.client(Some("probe")).await?;
        assert!(a_ambient.is_some());
        assert!(inner_b.client(Some("probe")).await?.is_none());
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(stats(&a).opens, 1);
    assert_eq!(stats(&b).opens, 1);
}

#[tokio::test]
async fn test_spawned_task_joins_ambient_transaction() {
    let xwrap = memory("prop-spawn");
    let inner = xwrap.clone();

    xwrap
        .transaction(|ctx| async move {
            let outer_id = ctx.client().id();
            let carried = xwrap_engine::spawn({
                let inner = inner.clone();
                async move { insert_audit_row(&inner).await }
            });
            let detached = tokio::spawn({
                let inner = inner.clone();
                async move { insert_audit_row(&inner).await }
            });

            assert_eq!(carried.await.unwrap()?, outer_id);
            assert_ne!(detached.await.unwrap()?, outer_id);
            Ok(())
        })
        .await
        .unwrap();

    let s = stats(&xwrap);
    assert_eq!((s.opens, s.commits), (2, 2));
}

#[tokio::test]
async fn test_sibling_tasks_are_independent() {
    let xwrap = memory("prop-siblings");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let xwrap = xwrap.clone();
            tokio::spawn(async move { xwrap.transaction(|ctx| async move { Ok(ctx.client().id()) }).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(stats(&xwrap).commits, 4);
}

// ============================================================================
// Clients, requests, wrap hook
// ============================================================================

#[tokio::test]
async fn test_client_outside_transaction_is_none() {
    let xwrap = memory("prop-client-none");
    assert!(xwrap.client(None).await.unwrap().is_none());
    assert!(xwrap.get_transaction(Some("lookup")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_take_client_falls_back_to_raw_client() {
    let xwrap = memory("prop-take");
    let raw = xwrap.take_client(Some("report")).await.unwrap();
    assert!(raw.journal().is_empty());

    let inner = xwrap.clone();
    let (taken, ambient) = xwrap
        .transaction(|ctx| async move { Ok((inner.take_client(None).await?, ctx.client().clone())) })
        .await
        .unwrap();
    assert_eq!(taken, ambient);
    assert_eq!(stats(&xwrap).clients, 2);
}

#[tokio::test]
async fn test_get_transaction_returns_owner() {
    let xwrap = memory("prop-get");
    let inner = xwrap.clone();

    xwrap
        .transaction_with(TransactionOptions::default().named("orders"), |_ctx| async move {
            let found = inner.get_transaction(Some("lookup")).await?.unwrap();
            assert_eq!(found.name(), "orders");
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_wrap_hook_gives_adapter_the_ambient_client() {
    let xwrap = memory("prop-wrap");
    assert!(xwrap.features().wrap);
    assert!(xwrap.adapter().is_wrapped());

    let adapter = xwrap.adapter().clone();
    assert!(adapter.ambient_client(None).await.unwrap().is_none());

    xwrap
        .transaction(|ctx| async move {
            let seen = adapter.ambient_client(Some("driver")).await?.unwrap();
            assert_eq!(&seen, ctx.client());
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_wrap_disabled_installs_nothing() {
    let xwrap: XWrap<MemoryAdapter> =
        XWrap::initialize(&XWrapConfig::new("memory", "prop-nowrap").with_wrap(false)).unwrap();
    assert!(!xwrap.adapter().is_wrapped());
}

#[tokio::test]
async fn test_lingering_request_after_end_opens_fresh() {
    let xwrap = memory("prop-linger");
    let inner = xwrap.clone();
    let (go, wait) = tokio::sync::oneshot::channel::<()>();

    let lingering = xwrap
        .transaction(|_ctx| async move {
            Ok(xwrap_engine::spawn(async move {
                let _ = wait.await;
                inner
                    .transaction(|ctx| async move { Ok(ctx.transaction().is_borrowed()) })
                    .await
            }))
        })
        .await
        .unwrap();

    go.send(()).unwrap();
    assert!(!lingering.await.unwrap().unwrap());
    assert_eq!(stats(&xwrap).opens, 2);
}

#[tokio::test]
async fn test_ask_inside_aborting_chain_is_cancelled() {
    let xwrap = memory("prop-aborting");
    let inner = xwrap.clone();

    let _ = xwrap
        .transaction(|_ctx| async move {
            let _ = inner
                .transaction(|_ctx| async move { Err::<(), _>(Error::work("nested")) })
                .await;
            match inner.client(None).await {
                Err(Error::Cancelled {
                    cause: CancelReason::ChainAborting { .. },
                }) => Ok(()),
                other => panic!("Expected chain abort, got {other:?}"),
            }
        })
        .await;
}

#[tokio::test]
async fn test_commit_failure_surfaces_adapter_error() {
    let xwrap = memory("prop-commit-fail");
    xwrap.adapter().set_fail_commit(true);

    let err = xwrap
        .transaction(|_ctx| async move { Ok(()) })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("refused to commit"));
    assert_eq!(stats(&xwrap).rollbacks, 1);
}

#[tokio::test]
async fn test_audit_row_commits_inside_failing_outer() {
    let xwrap = memory("prop-audit-new");
    let inner = xwrap.clone();

    let err = xwrap
        .transaction(|_ctx| async move {
            let _ = inner
                .transaction(|_ctx| async move { Err::<(), _>(Error::work("nested")) })
                .await;
            let audit = inner
                .transaction_of(XWrap::<MemoryAdapter>::NEW, |ctx| async move {
                    ctx.client().query("INSERT INTO audit");
                    Ok(ctx.client().clone())
                })
                .await?;
            assert_eq!(audit.journal(), vec!["BEGIN", "INSERT INTO audit", "COMMIT"]);
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RollbackOnly { .. }));
    let s = stats(&xwrap);
    assert_eq!((s.opens, s.commits, s.rollbacks), (2, 1, 1));
}

#[tokio::test]
async fn test_spawned_borrower_cannot_lend_settled_owner() {
    let xwrap = memory("prop-outlive");
    let inner = xwrap.clone();
    let (started, borrowing) = tokio::sync::oneshot::channel::<()>();
    let (go, wait) = tokio::sync::oneshot::channel::<()>();

    let (owner_client, straggler) = xwrap
        .transaction(|ctx| async move {
            let handle = xwrap_engine::spawn(async move {
                let nested = inner.clone();
                inner
                    .transaction(|_borrower| async move {
                        let _ = started.send(());
                        let _ = wait.await;
                        nested
                            .transaction(|ctx| async move {
                                ctx.client().query("INSERT INTO late");
                                Ok(ctx.transaction().is_borrowed())
                            })
                            .await
                    })
                    .await
            });
            let _ = borrowing.await;
            Ok((ctx.client().clone(), handle))
        })
        .await
        .unwrap();

    go.send(()).unwrap();
    let err = straggler.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::OwnerSettled { source: None, .. }));
    assert_eq!(owner_client.journal(), vec!["BEGIN", "COMMIT"]);
    let s = stats(&xwrap);
    assert_eq!((s.opens, s.commits, s.rollbacks), (2, 2, 0));
}

#[tokio::test]
async fn test_answering_restricts_to_named_caller() {
    let xwrap = memory("prop-answering");
    let inner = xwrap.clone();

    xwrap
        .transaction_with(TransactionOptions::default().answering("driver"), |_ctx| async move {
            assert!(inner.client(Some("driver")).await?.is_some());
            assert!(inner.client(Some("report")).await?.is_none());
            Ok(())
        })
        .await
        .unwrap();
}
