//! Group-by-group parallel builds.
//! 按分组并行构建。
//!
//! Each group from the scheduler is a barrier: its members run on up to
//! `max_jobs` worker threads, and the next group starts only after every
//! member finished. A group with failures ends the chain; later groups are
//! reported as skipped.
//! 调度器给出的每个分组都是一道屏障：组内成员最多在 `max_jobs` 个工作线程上运行，
//! 只有全部成员结束后才开始下一组。某组出现失败时链式构建结束，后续分组记为跳过。

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info, instrument};

/// Outcome of a chain build.
/// 链式构建的结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    pub built: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl ChainReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Build `groups` in order, calling `launch` for every member.
/// 按顺序构建 `groups`，对每个成员调用 `launch`。
///
/// `launch` returns whether the member built successfully.
/// `launch` 返回该成员是否构建成功。
#[instrument(skip_all, fields(groups = groups.len(), max_jobs = max_jobs))]
pub fn run_chain<F>(groups: &[Vec<String>], max_jobs: usize, launch: F) -> ChainReport
where
    F: Fn(&str) -> bool + Sync,
{
    let mut report = ChainReport::default();
    let mut remaining = groups.iter().enumerate();

    for (index, group) in remaining.by_ref() {
        info!(group = index, members = group.len(), "starting group");
        let (built, failed) = run_group(group, max_jobs, &launch);
        report.built.extend(built);
        let group_failed = !failed.is_empty();
        report.failed.extend(failed);
        if group_failed {
            error!(group = index, "group failed, stopping chain");
            break;
        }
    }
    for (_, group) in remaining {
        report.skipped.extend(group.iter().cloned());
    }
    report
}

fn run_group<F>(group: &[String], max_jobs: usize, launch: &F) -> (Vec<String>, Vec<String>)
where
    F: Fn(&str) -> bool + Sync,
{
    let next = AtomicUsize::new(0);
    let outcomes: Mutex<Vec<(usize, bool)>> = Mutex::new(Vec::with_capacity(group.len()));
    let workers = max_jobs.clamp(1, group.len().max(1));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(member) = group.get(i) else {
                        break;
                    };
                    let ok = launch(member);
                    if let Ok(mut outcomes) = outcomes.lock() {
                        outcomes.push((i, ok));
                    }
                }
            });
        }
    });

    let mut outcomes = outcomes.into_inner().unwrap_or_else(|e| e.into_inner());
    outcomes.sort_unstable();
    let mut built = Vec::new();
    let mut failed = Vec::new();
    for (i, ok) in outcomes {
        if ok {
            built.push(group[i].clone());
        } else {
            failed.push(group[i].clone());
        }
    }
    (built, failed)
}
