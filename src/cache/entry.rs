use crate::request::ResponseSnapshot;

#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub snapshot: ResponseSnapshot,
    pub size: u64,
    pub last_access: u64,
}

impl CacheEntry {
    pub fn new(snapshot: ResponseSnapshot, tick: u64) -> Self {
        let size = snapshot.body.len() as u64;
        Self {
            snapshot,
            size,
            last_access: tick,
        }
    }

    pub fn touch(&mut self, tick: u64) {
        self.last_access = tick;
    }
}
