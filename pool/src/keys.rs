//! Pure naming functions mapping `(namespace, job name, pool id, worker id)` to the stable
//! Redis key for each piece of state in §3's key family table. Nothing here touches the
//! network; every other module builds keys exclusively through this type so that the layout
//! stays in one place.

/// One tuple of keys sampled for a single fetch attempt (§4.1): the six keys the fetch script
/// needs to decide whether a job type is eligible and, if so, to move a job out of it.
#[derive(Debug, Clone)]
pub struct JobTypeKeys {
    pub jobs: String,
    pub inprogress: String,
    pub paused: String,
    pub lock: String,
    pub lock_info: String,
    pub max_concurrency: String,
}

#[derive(Debug, Clone)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Keys {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, suffix: impl std::fmt::Display) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    pub fn jobs(&self, name: &str) -> String {
        self.key(format_args!("jobs:{}", name))
    }

    pub fn paused(&self, name: &str) -> String {
        self.key(format_args!("jobs:{}:paused", name))
    }

    pub fn lock(&self, name: &str) -> String {
        self.key(format_args!("jobs:{}:lock", name))
    }

    pub fn lock_info(&self, name: &str) -> String {
        self.key(format_args!("jobs:{}:lock_info", name))
    }

    pub fn max_concurrency(&self, name: &str) -> String {
        self.key(format_args!("jobs:{}:max_concurrency", name))
    }

    pub fn inprogress(&self, name: &str, pool_id: &str) -> String {
        self.key(format_args!("jobs:{}:{}:inprogress", name, pool_id))
    }

    pub fn job_type_keys(&self, name: &str, pool_id: &str) -> JobTypeKeys {
        JobTypeKeys {
            jobs: self.jobs(name),
            inprogress: self.inprogress(name, pool_id),
            paused: self.paused(name),
            lock: self.lock(name),
            lock_info: self.lock_info(name),
            max_concurrency: self.max_concurrency(name),
        }
    }

    pub fn retry(&self) -> String {
        self.key("retry")
    }

    pub fn scheduled(&self) -> String {
        self.key("scheduled")
    }

    pub fn dead(&self) -> String {
        self.key("dead")
    }

    pub fn known_jobs(&self) -> String {
        self.key("known_jobs")
    }

    pub fn worker_pools(&self) -> String {
        self.key("worker_pools")
    }

    pub fn heartbeat(&self, pool_id: &str) -> String {
        self.key(format_args!("worker_pools:{}:heartbeat", pool_id))
    }

    pub fn observation(&self, pool_id: &str, worker_id: &str) -> String {
        self.key(format_args!(
            "worker_pools:{}:observations:{}",
            pool_id, worker_id
        ))
    }

    pub fn periodic_lease(&self) -> String {
        self.key("periodic_enqueuer:lease")
    }

    pub fn unique(&self, hash: &str) -> String {
        self.key(format_args!("unique:{}", hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let k = Keys::new("myapp");
        assert_eq!(k.jobs("email"), "myapp:jobs:email");
        assert_eq!(k.paused("email"), "myapp:jobs:email:paused");
        assert_eq!(k.lock("email"), "myapp:jobs:email:lock");
        assert_eq!(k.lock_info("email"), "myapp:jobs:email:lock_info");
        assert_eq!(
            k.max_concurrency("email"),
            "myapp:jobs:email:max_concurrency"
        );
        assert_eq!(
            k.inprogress("email", "pool-1"),
            "myapp:jobs:email:pool-1:inprogress"
        );
        assert_eq!(k.retry(), "myapp:retry");
        assert_eq!(k.scheduled(), "myapp:scheduled");
        assert_eq!(k.dead(), "myapp:dead");
        assert_eq!(k.known_jobs(), "myapp:known_jobs");
        assert_eq!(k.worker_pools(), "myapp:worker_pools");
        assert_eq!(
            k.heartbeat("pool-1"),
            "myapp:worker_pools:pool-1:heartbeat"
        );
        assert_eq!(
            k.observation("pool-1", "w-1"),
            "myapp:worker_pools:pool-1:observations:w-1"
        );
        assert_eq!(k.periodic_lease(), "myapp:periodic_enqueuer:lease");
        assert_eq!(k.unique("abc123"), "myapp:unique:abc123");
    }

    #[test]
    fn job_type_keys_match_individual_accessors() {
        let k = Keys::new("ns");
        let tuple = k.job_type_keys("send", "pool-a");
        assert_eq!(tuple.jobs, k.jobs("send"));
        assert_eq!(tuple.inprogress, k.inprogress("send", "pool-a"));
        assert_eq!(tuple.paused, k.paused("send"));
        assert_eq!(tuple.lock, k.lock("send"));
        assert_eq!(tuple.lock_info, k.lock_info("send"));
        assert_eq!(tuple.max_concurrency, k.max_concurrency("send"));
    }
}
