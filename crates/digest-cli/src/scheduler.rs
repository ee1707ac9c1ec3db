use std::time::Duration;

use digest_core::{BatchNotifier, BatchResult};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{error, info, warn};

/// 1 回実行する（`limit` があればタイムアウト付き）
///
/// 失敗を返さない。結果はすべてログに出すので、ループは必ず次の tick に進める。
/// タイムアウトで打ち切ると配送途中でも future が drop される
/// （SpoolMailer なら `.tmp` が残ることがある）。
pub async fn run_logged(notifier: &BatchNotifier, limit: Option<Duration>) -> Option<BatchResult> {
    let run = notifier.run_once();
    let outcome = match limit {
        Some(limit) => match timeout(limit, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "run timed out; pending records stay pending");
                return None;
            }
        },
        None => run.await,
    };

    match outcome {
        Ok(result) => {
            info!(?result, "run finished");
            Some(result)
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "run aborted");
            None
        }
    }
}

/// `every` ごとに実行し、`shutdown_rx` が true になったら止まる
/// - 実行は重ならない（前の実行が返ってから次の tick を待つ）
/// - 遅れた実行はまとめて取り返さず、スケジュールを後ろにずらす
/// - shutdown は新しい tick を止めるだけで、実行中の run は最後まで走らせる
pub async fn watch_loop(
    notifier: &BatchNotifier,
    every: Duration,
    limit: Option<Duration>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender が消えたら止まる
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        run_logged(notifier, limit).await;
    }
    info!("watch loop stopped");
}
