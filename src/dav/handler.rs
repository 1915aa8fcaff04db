use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use dav_server::davpath::DavPath;
use dav_server::{DavHandler, DavMethodSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::tree::{DebridDavFs, Node};
use crate::error::{DebridDavError, DebridDavResult};
use crate::fs::DebridFs;

const ALLOW: &str = "OPTIONS, PROPFIND, GET, HEAD, DELETE";

/// WebDAV front end. Reads go to [`DavHandler`] over [`DebridDavFs`];
/// `DELETE` removes whole torrents and is answered here.
pub struct DavService {
    fs: Arc<DebridFs>,
    tree: DebridDavFs,
    handler: DavHandler,
}

impl DavService {
    pub fn new(fs: Arc<DebridFs>) -> Self {
        let tree = DebridDavFs::new(Arc::clone(&fs));
        let handler = DavHandler::builder()
            .filesystem(Box::new(tree.clone()))
            .methods(DavMethodSet::WEBDAV_RO)
            .build_handler();
        Self { fs, tree, handler }
    }

    /// Serve one WebDAV request.
    pub async fn handle(&self, req: Request) -> Response {
        let method = req.method().clone();
        let raw_path = req.uri().path().to_string();
        let metrics = &self.fs.metrics().dav;

        let resp = match method.as_str() {
            "OPTIONS" => {
                metrics.record_options();
                let mut resp = self.forward(req).await;
                resp.headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(ALLOW));
                resp
            }
            "PROPFIND" => {
                metrics.record_propfind();
                self.forward(req).await
            }
            "GET" | "HEAD" => {
                if method == Method::HEAD {
                    metrics.record_head();
                } else {
                    metrics.record_get();
                }
                if self.is_collection(&raw_path) {
                    let mut resp = status_response(StatusCode::METHOD_NOT_ALLOWED);
                    resp.headers_mut().insert(
                        header::ALLOW,
                        HeaderValue::from_static("OPTIONS, PROPFIND, DELETE"),
                    );
                    resp
                } else {
                    self.forward(req).await
                }
            }
            "DELETE" => {
                metrics.record_delete();
                match self.delete(&raw_path).await {
                    Ok(resp) => resp,
                    Err(e) => self.error_response(&method, &raw_path, e),
                }
            }
            other => {
                metrics.record_unsupported(other);
                let err = DebridDavError::NotImplemented(format!("{} is not supported", other));
                let mut resp = self.error_response(&method, &raw_path, err);
                resp.headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(ALLOW));
                resp
            }
        };

        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            metrics.record_not_modified();
        } else if status.is_client_error() || status.is_server_error() {
            metrics.record_error();
            debug!(dav_op = %method, path = %raw_path, status = status.as_u16(), "Request rejected");
        }
        resp
    }

    async fn forward(&self, req: Request) -> Response {
        self.handler.handle(req).await.map(Body::new)
    }

    fn is_collection(&self, raw_path: &str) -> bool {
        DavPath::new(raw_path)
            .ok()
            .and_then(|path| self.tree.locate(&path).ok())
            .is_some_and(|node| node.is_collection())
    }

    fn error_response(&self, method: &Method, path: &str, err: DebridDavError) -> Response {
        let status = err.to_status_code();
        if status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED {
            warn!(dav_op = %method, path = %path, status = status.as_u16(), error = %err, "Request failed");
        }
        status_response(status)
    }

    #[instrument(skip(self), fields(dav_op = "delete"))]
    async fn delete(&self, raw_path: &str) -> DebridDavResult<Response> {
        let path = DavPath::new(raw_path)
            .map_err(|_| DebridDavError::InvalidArgument(format!("bad path {}", raw_path)))?;
        let node = self
            .tree
            .locate(&path)
            .map_err(|_| DebridDavError::NotFound(raw_path.to_string()))?;

        match node {
            Node::Root | Node::All => Err(DebridDavError::PermissionDenied(
                "the root collections cannot be deleted".to_string(),
            )),
            Node::Torrent(torrent) => {
                let item = self
                    .fs
                    .catalog()
                    .get(&torrent)
                    .ok_or_else(|| DebridDavError::NotFound(torrent.clone()))?;
                self.fs.delete_torrent(&item.id).await?;
                Ok(status_response(StatusCode::NO_CONTENT))
            }
            Node::File { torrent, file } => {
                // Acknowledged only; the remote torrent is left as is.
                let item = self.tree.lookup_torrent(&torrent)?;
                debug!(torrent_id = %item.id, file = %file, "File-level delete acknowledged");
                Ok(status_response(StatusCode::NO_CONTENT))
            }
        }
    }
}

/// Bare status answer. Clients see the status only; operators read reasons
/// from the log and the management API.
fn status_response(status: StatusCode) -> Response {
    let body = if status.is_success() {
        Body::empty()
    } else {
        Body::from(status.canonical_reason().unwrap_or("Error"))
    };
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    if !status.is_success() {
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    }
    resp
}
