//! Record store interface.
//!
//! The store owns every [`WatchRecord`]. Callers only ever read copies and
//! mutate status through [`RecordStore::update_status`], which is conditional
//! on the resource version they last observed.
//!
//! Methods are blocking; async callers wrap them in `spawn_blocking`.

use crate::error::StoreError;
use crate::types::{Namespace, RecordKey, ResourceVersion, StatusSnapshot, WatchRecord, WatchStatus};

/// One page request for [`RecordStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub namespace: Option<Namespace>,
    pub limit: Option<usize>,
    pub continue_token: Option<String>,
}

/// One page of records. `continue_token` is `Some` while more pages remain.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub items: Vec<WatchRecord>,
    pub continue_token: Option<String>,
}

pub trait RecordStore: Send + Sync {
    /// List one page of records, optionally filtered to a namespace.
    fn list(&self, request: &ListRequest) -> Result<RecordPage, StoreError>;

    /// Current status and resource version of one record.
    fn get_status(&self, key: &RecordKey) -> Result<StatusSnapshot, StoreError>;

    /// Replace the status of `key` if its resource version still equals
    /// `expected`. Returns the new resource version.
    fn update_status(
        &self,
        key: &RecordKey,
        expected: &ResourceVersion,
        status: &WatchStatus,
    ) -> Result<ResourceVersion, StoreError>;
}

/// Follow continue tokens until the listing is exhausted.
///
/// Either every page is returned or the first error is; a partial listing is
/// never handed back.
pub fn enumerate(
    store: &dyn RecordStore,
    namespace: Option<&Namespace>,
    page_size: usize,
) -> Result<Vec<WatchRecord>, StoreError> {
    let mut records = Vec::new();
    let mut request = ListRequest {
        namespace: namespace.cloned(),
        limit: Some(page_size.max(1)),
        continue_token: None,
    };
    loop {
        let page = store.list(&request)?;
        records.extend(page.items);
        match page.continue_token {
            Some(token) => request.continue_token = Some(token),
            None => break,
        }
    }
    Ok(records)
}
