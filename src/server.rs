use {
    crate::broadcast::{camera, flv, CameraBroadcaster, FlvBroadcaster, HlsBroadcaster},
    crate::config::Settings,
    crate::errors::{ErrorHandler, RelayError, Result},
    crate::registry::Registry,
    crate::subscriber::{HlsSubscriber, StreamSubscriber},
    crate::transport::CloseKind,
    hyper::{
        service::{make_service_fn, service_fn},
        Body, Method, Request, Response, Server, StatusCode,
    },
    std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc},
};

const SEGMENT_EXTENSIONS: [&str; 4] = [".ts", ".m4s", ".mp4", ".bin"];

/// Everything the request handlers share: one registry per transport.
pub struct AppContext {
    pub flv: Registry<FlvBroadcaster>,
    pub hls: Registry<HlsBroadcaster>,
    pub camera: Registry<CameraBroadcaster>,
    pub debug: bool,
    pub camera_gop_max: usize,
}

impl AppContext {
    pub fn new(settings: &Settings) -> Self {
        Self {
            flv: Registry::new(),
            hls: Registry::new(),
            camera: Registry::new(),
            debug: settings.common.debug,
            camera_gop_max: settings.live.camera_gop_max,
        }
    }

    /// Closes every broadcaster so subscriber write loops drain out.
    pub fn shutdown_broadcasters(&self) {
        for (_, b) in self.flv.drain() {
            b.shutdown();
        }
        for (_, b) in self.hls.drain() {
            b.shutdown();
        }
        for (_, b) in self.camera.drain() {
            b.shutdown(CloseKind::Shutdown);
        }
    }
}

pub struct Service {
    ctx: Arc<AppContext>,
}

impl Service {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn run<F>(&self, port: u16, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let ctx = self.ctx.clone();
        let make_service = make_service_fn(move |_| {
            let ctx = ctx.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle(ctx.clone(), req))) }
        });

        let server = Server::bind(&addr)
            .serve(make_service)
            .with_graceful_shutdown(shutdown);
        log::info!("HTTP service listening on http://{}", addr);
        server.await.map_err(|e| RelayError::Internal {
            message: e.to_string(),
        })
    }
}

pub(crate) async fn handle(
    ctx: Arc<AppContext>,
    req: Request<Body>,
) -> std::result::Result<Response<Body>, Infallible> {
    if ctx.debug {
        log::info!("{} {}", req.method(), req.uri().path());
    }
    let response = dispatch(ctx, req)
        .await
        .unwrap_or_else(|e| ErrorHandler::handle_error(&e));
    Ok(response)
}

async fn dispatch(ctx: Arc<AppContext>, req: Request<Body>) -> Result<Response<Body>> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, parts.as_slice()) {
        (&Method::GET, ["api", "ping"]) => text_response("pong"),
        (&Method::GET, ["api", "live", "flv", key, client_id]) => live_flv(&ctx, key, client_id),
        (&Method::POST, ["api", "live", "camera", "ingest", key]) => {
            let key = key.to_string();
            camera_ingest(&ctx, &key, req.into_body()).await
        }
        (&Method::GET, ["api", "live", "camera", key, client_id]) => {
            camera_pull(&ctx, key, client_id)
        }
        (&Method::GET, ["api", "live", "hls", key, client_id, rest @ ..]) if !rest.is_empty() => {
            live_hls(&ctx, key, client_id, rest)
        }
        _ => not_found(),
    }
}

fn live_flv(ctx: &AppContext, key: &str, client_id: &str) -> Result<Response<Body>> {
    let broadcaster = ctx.flv.find(key)?;
    let (sender, body) = Body::channel();
    let tx = StreamSubscriber::spawn(
        key,
        client_id,
        flv::QUEUE_CAPACITY,
        broadcaster.handle(),
        sender,
    );
    broadcaster.join(client_id, tx);

    Response::builder()
        .header("Content-Type", "video/x-flv")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .body(body)
        .map_err(internal)
}

/// A POST body is the channel's single producer: the broadcaster lives
/// exactly as long as the ingest request.
async fn camera_ingest(ctx: &AppContext, key: &str, mut body: Body) -> Result<Response<Body>> {
    let broadcaster = CameraBroadcaster::spawn(key, ctx.camera_gop_max);
    if let Err(e) = ctx.camera.add(key, broadcaster.clone()) {
        broadcaster.shutdown(CloseKind::Ended);
        return Err(e);
    }

    let result = broadcaster.ingest_loop(&mut body).await;

    broadcaster.shutdown(CloseKind::Ended);
    ctx.camera.remove(key);
    result?;
    text_response("ok")
}

fn camera_pull(ctx: &AppContext, key: &str, client_id: &str) -> Result<Response<Body>> {
    let broadcaster = ctx.camera.find(key)?;
    let (sender, body) = Body::channel();
    let tx = StreamSubscriber::spawn(
        key,
        client_id,
        camera::QUEUE_CAPACITY,
        broadcaster.handle(),
        sender,
    );
    broadcaster.join(client_id, tx);

    Response::builder()
        .header("Content-Type", "video/x-flv")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .body(body)
        .map_err(internal)
}

fn live_hls(ctx: &AppContext, key: &str, client_id: &str, rest: &[&str]) -> Result<Response<Body>> {
    let filename = rest.last().copied().unwrap_or_default();
    let broadcaster = ctx.hls.find(key)?;

    if filename == "index.m3u8" {
        broadcaster.register_client(client_id);
        let subscriber = HlsSubscriber::new(key, client_id);
        return Ok(subscriber.handle_index(&broadcaster));
    }

    if SEGMENT_EXTENSIONS.iter().any(|ext| filename.ends_with(ext)) {
        if !broadcaster.client_registered(client_id) {
            return Err(RelayError::ClientNotFound {
                id: client_id.to_owned(),
            });
        }
        let subscriber = HlsSubscriber::new(key, client_id);
        return Ok(subscriber.handle_segment(&broadcaster, filename));
    }

    not_found()
}

fn text_response(text: &'static str) -> Result<Response<Body>> {
    Response::builder()
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Body::from(text))
        .map_err(internal)
}

fn not_found() -> Result<Response<Body>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("not found"))
        .map_err(internal)
}

fn internal(e: hyper::http::Error) -> RelayError {
    RelayError::Internal {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::hls::Segment;
    use bytes::Bytes;
    use hyper::body::to_bytes;
    use std::time::Instant;

    fn test_ctx() -> Arc<AppContext> {
        Arc::new(AppContext::new(&Settings::default()))
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn ping_pongs() {
        let resp = handle(test_ctx(), get("/api/ping")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&to_bytes(resp.into_body()).await.unwrap()[..], b"pong");
    }

    #[tokio::test]
    async fn unknown_routes_are_404() {
        let resp = handle(test_ctx(), get("/api/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_flv_channel_is_404() {
        let resp = handle(test_ctx(), get("/api/live/flv/nochan/c1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn flv_channel_responds_with_stream_headers() {
        let ctx = test_ctx();
        let b = FlvBroadcaster::spawn("room1", "http://127.0.0.1:9/live.flv");
        ctx.flv.add("room1", b).unwrap();

        let resp = handle(ctx.clone(), get("/api/live/flv/room1/c1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["Content-Type"], "video/x-flv");
        assert_eq!(resp.headers()["Cache-Control"], "no-cache");
        ctx.shutdown_broadcasters();
    }

    #[tokio::test]
    async fn hls_index_registers_then_segment_is_served() {
        let ctx = test_ctx();
        let b = HlsBroadcaster::spawn("cam", "http://127.0.0.1:9/index.m3u8", "", 3);
        b.state().push_segment(Segment {
            seq: 2,
            uri: "http://origin.example/x.ts".into(),
            local_name: "2.ts".into(),
            data: Bytes::from_static(b"segdata"),
            duration: 2.0,
            discontinuity: false,
            added_at: Instant::now(),
        });
        ctx.hls.add("cam", b).unwrap();

        // segment before playlist: the client is not registered yet
        let resp = handle(ctx.clone(), get("/api/live/hls/cam/c1/2.ts"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = handle(ctx.clone(), get("/api/live/hls/cam/c1/index.m3u8"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = to_bytes(resp.into_body()).await.unwrap();
        assert!(std::str::from_utf8(&text).unwrap().contains("2.ts"));

        let resp = handle(ctx.clone(), get("/api/live/hls/cam/c1/2.ts"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&to_bytes(resp.into_body()).await.unwrap()[..], b"segdata");

        ctx.shutdown_broadcasters();
    }

    #[tokio::test]
    async fn camera_ingest_rejects_duplicate_keys() {
        let ctx = test_ctx();
        let existing = CameraBroadcaster::spawn("cam1", 16);
        ctx.camera.add("cam1", existing).unwrap();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/live/camera/ingest/cam1")
            .body(Body::from(&b"\x17data"[..]))
            .unwrap();
        let resp = handle(ctx.clone(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        ctx.shutdown_broadcasters();
    }

    #[tokio::test]
    async fn camera_ingest_lifecycle_registers_and_removes() {
        let ctx = test_ctx();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/live/camera/ingest/cam1")
            .body(Body::from(&b"\x17keyframe-bytes"[..]))
            .unwrap();
        let resp = handle(ctx.clone(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        // single-producer contract: the channel is gone with its ingest
        assert!(ctx.camera.find("cam1").is_err());
    }
}
