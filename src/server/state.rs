use std::sync::Arc;

use crate::dav::DavService;
use crate::fs::DebridFs;
use crate::mount::MountSupervisor;

/// Shared application state
pub struct AppState {
    fs: Arc<DebridFs>,
    dav: DavService,
    mounts: Arc<MountSupervisor>,
}

impl AppState {
    pub fn new(fs: Arc<DebridFs>, mounts: Arc<MountSupervisor>) -> Self {
        let dav = DavService::new(Arc::clone(&fs));
        Self { fs, dav, mounts }
    }

    pub fn fs(&self) -> &Arc<DebridFs> {
        &self.fs
    }

    pub fn dav(&self) -> &DavService {
        &self.dav
    }

    pub fn mounts(&self) -> &Arc<MountSupervisor> {
        &self.mounts
    }

    /// Credential handed to mount processes: the token currently in use.
    pub fn mount_credential(&self) -> Option<String> {
        self.fs.tokens().current().ok()
    }
}
