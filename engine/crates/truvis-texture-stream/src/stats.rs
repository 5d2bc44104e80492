use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 流式加载的累计统计，各个 stage 无锁地递增
#[derive(Debug, Default)]
pub struct StreamingStats {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    decodes: AtomicU64,
    mip_chains: AtomicU64,
    allocations: AtomicU64,
    uploads: AtomicU64,
    upload_batches: AtomicU64,
    staging_flushes: AtomicU64,
    staged_bytes: AtomicU64,
    failures: AtomicU64,
}

/// [`StreamingStats`] 在某一时刻的值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingStatsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub decodes: u64,
    pub mip_chains: u64,
    pub allocations: u64,
    pub uploads: u64,
    pub upload_batches: u64,
    /// 因为 staging 空间不足而提前提交的次数
    pub staging_flushes: u64,
    pub staged_bytes: u64,
    pub failures: u64,
}

impl StreamingStats {
    #[inline]
    fn bump(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn record_request(&self, cache_hit: bool) {
        Self::bump(&self.requests, 1);
        if cache_hit {
            Self::bump(&self.cache_hits, 1);
        }
    }

    pub fn record_decode(&self) {
        Self::bump(&self.decodes, 1);
    }

    pub fn record_mip_chain(&self) {
        Self::bump(&self.mip_chains, 1);
    }

    pub fn record_allocation(&self) {
        Self::bump(&self.allocations, 1);
    }

    pub fn record_upload(&self, bytes: u64) {
        Self::bump(&self.uploads, 1);
        Self::bump(&self.staged_bytes, bytes);
    }

    pub fn record_batch(&self) {
        Self::bump(&self.upload_batches, 1);
    }

    pub fn record_staging_flush(&self) {
        Self::bump(&self.staging_flushes, 1);
    }

    pub fn record_failure(&self) {
        Self::bump(&self.failures, 1);
    }

    pub fn snapshot(&self) -> StreamingStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StreamingStatsSnapshot {
            requests: load(&self.requests),
            cache_hits: load(&self.cache_hits),
            decodes: load(&self.decodes),
            mip_chains: load(&self.mip_chains),
            allocations: load(&self.allocations),
            uploads: load(&self.uploads),
            upload_batches: load(&self.upload_batches),
            staging_flushes: load(&self.staging_flushes),
            staged_bytes: load(&self.staged_bytes),
            failures: load(&self.failures),
        }
    }
}

impl fmt::Display for StreamingStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests: {} (cache hits: {}), decodes: {}, mip chains: {}, allocations: {}, uploads: {} in {} batches \
             ({} staging flushes, {:.2} MiB), failures: {}",
            self.requests,
            self.cache_hits,
            self.decodes,
            self.mip_chains,
            self.allocations,
            self.uploads,
            self.upload_batches,
            self.staging_flushes,
            self.staged_bytes as f64 / (1024.0 * 1024.0),
            self.failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = StreamingStats::default();
        stats.record_request(false);
        stats.record_request(true);
        stats.record_upload(1024);
        stats.record_upload(2048);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.uploads, 2);
        assert_eq!(snapshot.staged_bytes, 3072);
        assert!(snapshot.to_string().contains("cache hits: 1"));
    }
}
