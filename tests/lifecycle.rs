//! Cancellation, supersession, callback ordering, and error propagation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use endpoint_query::{
    CancelSignal, CancelSource, Endpoint, FailureContext, QueryError, QueryOptions, Status,
};

const LONG_STALE: Duration = Duration::from_secs(100 * 60);

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

/// Endpoint whose fetcher resolves from a queue of handed-out receivers, so
/// tests control completion order.
fn scripted_endpoint(
    results: Vec<tokio::sync::oneshot::Receiver<String>>,
) -> Endpoint<u32, String, String> {
    let pending = Arc::new(Mutex::new(results));
    Endpoint::new(move |_arg: u32, _signal| {
        let receiver = pending.lock().unwrap().remove(0);
        async move { Ok(receiver.await.expect("result sender dropped")) }
    })
}

#[tokio::test]
async fn cancel_resets_to_idle() {
    let endpoint: Endpoint<String, String, String> =
        Endpoint::new(|arg: String, _signal| async move {
            tokio::time::sleep(Duration::from_secs(1000)).await;
            Ok(arg)
        });
    let observer = endpoint.use_query(QueryOptions::default());

    let pending = {
        let observer = observer.clone();
        tokio::spawn(async move { observer.trigger_async("test".to_string()).await })
    };
    wait_until(|| observer.is_fetching()).await;

    assert!(observer.cancel());

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(QueryError::Cancelled)));
    assert_eq!(observer.status(), Status::Idle);
    assert!(observer.error().is_none());
    assert!(!observer.has_data());
    assert!(!observer.is_fetching());
}

#[tokio::test]
async fn cancel_without_an_attempt_reports_false() {
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|arg: u32, _signal| async move { Ok(arg.to_string()) });
    let observer = endpoint.use_query(QueryOptions::default());

    assert!(!observer.cancel());

    observer.set_arg_async(1).await.unwrap();
    assert!(!observer.cancel());
    assert_eq!(observer.status(), Status::Success);
}

#[tokio::test]
async fn superseded_completion_is_discarded() {
    let (first_tx, first_rx) = tokio::sync::oneshot::channel();
    let (second_tx, second_rx) = tokio::sync::oneshot::channel();
    let endpoint = scripted_endpoint(vec![first_rx, second_rx]);
    let observer = endpoint.use_query(QueryOptions::default());

    observer.set_arg(0);
    // The first attempt's result is ready before it is ever polled, but the
    // cancel below retires its token first.
    first_tx.send("zero".to_string()).unwrap();
    assert!(observer.cancel());
    observer.refetch();

    second_tx.send("one".to_string()).unwrap();
    wait_until(|| observer.data() == Some("one".to_string())).await;
    assert_eq!(observer.status(), Status::Success);
}

#[tokio::test]
async fn latest_attempt_wins_when_the_old_one_resolves_late() {
    let (first_tx, first_rx) = tokio::sync::oneshot::channel();
    let (second_tx, second_rx) = tokio::sync::oneshot::channel();
    let endpoint = scripted_endpoint(vec![first_rx, second_rx]);
    let observer = endpoint.use_query(QueryOptions::default());

    observer.set_arg(0);
    wait_until(|| observer.is_fetching()).await;
    assert!(observer.cancel());
    observer.refetch();

    second_tx.send("one".to_string()).unwrap();
    wait_until(|| observer.data() == Some("one".to_string())).await;

    // The cancelled attempt resolves afterwards and changes nothing.
    let _ = first_tx.send("zero".to_string());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(observer.data(), Some("one".to_string()));
    assert_eq!(observer.status(), Status::Success);
}

#[tokio::test]
async fn last_data_outlives_errors_and_transitions() {
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|arg: u32, _signal| async move {
            match arg {
                2 => Err("boom".to_string()),
                4 => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(arg.to_string())
                }
                _ => Ok(arg.to_string()),
            }
        });
    let observer = endpoint.use_query(QueryOptions::default().stale_time(LONG_STALE));

    observer.set_arg_async(1).await.unwrap();
    assert_eq!(observer.last_data(), Some("1".to_string()));

    // A failing argument: current data is gone, last_data survives.
    let error = observer.set_arg_async(2).await.unwrap_err();
    assert!(matches!(error, QueryError::Failed(_)));
    assert_eq!(observer.status(), Status::Error);
    assert_eq!(observer.data(), None);
    assert_eq!(observer.last_data(), Some("1".to_string()));

    observer.set_arg_async(3).await.unwrap();
    assert_eq!(observer.last_data(), Some("3".to_string()));

    // While the next page loads, the previous page stays readable.
    observer.set_arg(4);
    assert!(observer.is_fetching());
    assert_eq!(observer.data(), None);
    assert_eq!(observer.last_data(), Some("3".to_string()));
    wait_until(|| observer.data() == Some("4".to_string())).await;
    assert_eq!(observer.last_data(), Some("4".to_string()));
}

#[tokio::test]
async fn success_callback_fires_before_state_changed() {
    let events = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|arg: u32, _signal| async move { Ok(arg.to_string()) });

    let observer = endpoint.use_query(QueryOptions::default().on_success({
        let events = events.clone();
        move |context| {
            assert_eq!(context.arg, 1);
            assert_eq!(context.result, "1");
            events.lock().unwrap().push("success");
        }
    }));
    observer.add_listener({
        let events = events.clone();
        move || events.lock().unwrap().push("state")
    });

    observer.set_arg_async(1).await.unwrap();

    // Adoption and fetch start each notify once; completion runs the
    // success callback before its notification.
    let events = events.lock().unwrap();
    assert_eq!(*events, vec!["state", "state", "success", "state"]);
}

#[tokio::test]
async fn failure_callback_receives_the_error() {
    let seen = Arc::new(Mutex::new(None));
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|_arg: u32, _signal| async move { Err("boom".to_string()) });

    let observer = endpoint.use_query(QueryOptions::default().on_failure({
        let seen = seen.clone();
        move |context: FailureContext<u32, String>| {
            *seen.lock().unwrap() = Some((context.arg, context.error.to_string()));
        }
    }));

    let error = observer.set_arg_async(7).await.unwrap_err();
    assert_eq!(error.failure().map(|e| e.as_str()), Some("boom"));
    assert_eq!(observer.status(), Status::Error);
    assert_eq!(observer.error().map(|e| e.to_string()), Some("boom".to_string()));
    assert_eq!(*seen.lock().unwrap(), Some((7, "boom".to_string())));
}

#[tokio::test]
async fn failed_refetch_keeps_stale_data() {
    let fail = Arc::new(Mutex::new(false));
    let endpoint: Endpoint<u32, String, String> = Endpoint::new({
        let fail = fail.clone();
        move |arg: u32, _signal| {
            let fail = *fail.lock().unwrap();
            async move {
                if fail {
                    Err("boom".to_string())
                } else {
                    Ok(arg.to_string())
                }
            }
        }
    });
    let observer = endpoint.use_query(QueryOptions::default().stale_time(LONG_STALE));

    observer.set_arg_async(1).await.unwrap();
    *fail.lock().unwrap() = true;

    let error = observer.refetch_async().await.unwrap_err();
    assert!(matches!(error, QueryError::Failed(_)));
    assert_eq!(observer.status(), Status::Error);
    assert_eq!(observer.data(), Some("1".to_string()));
    assert!(observer.has_data());
}

#[tokio::test]
async fn refetch_without_an_argument_is_a_programmer_error() {
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|arg: u32, _signal| async move { Ok(arg.to_string()) });
    let observer = endpoint.use_query(QueryOptions::default());

    let error = observer.refetch_async().await.unwrap_err();
    assert!(matches!(error, QueryError::Detached));
}

#[tokio::test]
async fn detach_is_idempotent_and_clears_state() {
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|arg: u32, _signal| async move { Ok(arg.to_string()) });
    let observer = endpoint.use_query(QueryOptions::default());

    observer.set_arg_async(1).await.unwrap();
    assert!(observer.has_arg());

    observer.detach();
    observer.detach();

    assert!(!observer.has_arg());
    assert_eq!(observer.status(), Status::Idle);
    assert!(observer.is_uninitialized());
    assert_eq!(observer.data(), None);

    // The cache entry itself is untouched.
    assert!(endpoint.query_state(&1).is_some());
}

#[tokio::test]
async fn invoke_bypasses_the_cache() {
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|arg: u32, _signal| async move { Ok(arg.to_string()) });

    let value = endpoint.invoke(7, CancelSignal::never()).await.unwrap();
    assert_eq!(value, "7");
    assert_eq!(endpoint.size(), 0);
}

#[tokio::test]
async fn invoke_surfaces_failures() {
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|_arg: u32, _signal| async move { Err("boom".to_string()) });

    let error = endpoint.invoke(7, CancelSignal::never()).await.unwrap_err();
    assert_eq!(error.failure().map(|e| e.as_str()), Some("boom"));
}

#[tokio::test]
async fn invoke_honors_cancellation() {
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|arg: u32, _signal| async move {
            tokio::time::sleep(Duration::from_secs(1000)).await;
            Ok(arg.to_string())
        });

    let (source, signal) = CancelSource::new();
    let call = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.invoke(7, signal).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    source.cancel();

    let result = call.await.unwrap();
    assert!(matches!(result, Err(QueryError::Cancelled)));
}

#[tokio::test]
async fn switching_arguments_reuses_cached_success() {
    let endpoint: Endpoint<u32, String, String> =
        Endpoint::new(|arg: u32, _signal| async move { Ok(arg.to_string()) });

    let observer = endpoint.use_query(QueryOptions::default().stale_time(LONG_STALE));
    observer.set_arg_async(1).await.unwrap();
    observer.set_arg_async(2).await.unwrap();
    assert_eq!(observer.data(), Some("2".to_string()));

    // Back to the first page: served from cache, still a success.
    observer.set_arg_async(1).await.unwrap();
    assert_eq!(observer.data(), Some("1".to_string()));
    assert_eq!(observer.status(), Status::Success);
}
