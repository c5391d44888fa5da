//! IPカメラ（スナップショットURL）からの映像取得テスト
//!
//! axum のモックカメラでプロファイルの順次試行と疑似映像への切替を検証

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steel_qc::capture::{CaptureSource, HttpSnapshotCamera, SourceState};

/// モックカメラの状態
struct MockCamera {
    healthy: AtomicBool,
    /// 解像度指定を受け付けない
    reject_resolution: bool,
    png: Vec<u8>,
    requests: Mutex<Vec<HashMap<String, String>>>,
}

impl MockCamera {
    fn new(healthy: bool, reject_resolution: bool) -> Arc<Self> {
        let image = RgbImage::from_pixel(32, 24, Rgb([180, 180, 190]));
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png).expect("PNGエンコード失敗");

        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            reject_resolution,
            png: png.into_inner(),
            requests: Mutex::new(Vec::new()),
        })
    }
}

async fn snapshot(State(camera): State<Arc<MockCamera>>, Query(query): Query<HashMap<String, String>>) -> Response {
    let rejected = camera.reject_resolution && query.contains_key("width");
    camera.requests.lock().unwrap().push(query);

    if !camera.healthy.load(Ordering::SeqCst) || rejected {
        return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], camera.png.clone()).into_response()
}

async fn serve(camera: Arc<MockCamera>) -> String {
    let app = Router::new().route("/snapshot", get(snapshot)).with_state(camera);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind失敗");
    let addr = listener.local_addr().expect("アドレス取得失敗");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("サーバー異常終了");
    });
    format!("http://{}/snapshot", addr)
}

fn source(url: String, allow_simulated: bool) -> CaptureSource {
    let camera = HttpSnapshotCamera::new(url, Duration::from_secs(5)).expect("クライアント作成失敗");
    CaptureSource::new(Box::new(camera), vec![], allow_simulated)
}

// ============================================
// プロファイル
// ============================================

/// 最初のプロファイルで開ければ Streaming
#[tokio::test]
async fn test_first_profile_streams() {
    let camera = MockCamera::new(true, false);
    let mut source = source(serve(camera.clone()).await, true);

    assert_eq!(source.activate().await, SourceState::Streaming);
    assert_eq!(source.active_profile(), Some("rear-fullhd"));

    let frame = source.capture().await.expect("撮影失敗");
    assert!(!frame.simulated);
    assert_eq!((frame.width, frame.height), (32, 24));

    let requests = camera.requests.lock().unwrap();
    assert_eq!(requests[0].get("width").map(String::as_str), Some("1920"));
    assert_eq!(requests[0].get("height").map(String::as_str), Some("1080"));
    assert_eq!(requests[0].get("facing").map(String::as_str), Some("environment"));
}

/// 解像度指定が拒否されたら次のプロファイルを試す
#[tokio::test]
async fn test_falls_through_to_next_profile() {
    let camera = MockCamera::new(true, true);
    let mut source = source(serve(camera.clone()).await, true);

    assert_eq!(source.activate().await, SourceState::Streaming);
    assert_eq!(source.active_profile(), Some("rear"));

    let frame = source.capture().await.expect("撮影失敗");
    assert!(!frame.simulated);

    let requests = camera.requests.lock().unwrap();
    assert!(requests[0].contains_key("width"));
    assert!(!requests[1].contains_key("width"));
}

// ============================================
// 疑似映像への切替と復帰
// ============================================

/// 全プロファイルが失敗したら疑似映像、復旧後の再取得で Streaming
#[tokio::test]
async fn test_simulated_then_recovers() {
    let camera = MockCamera::new(false, false);
    let mut source = source(serve(camera.clone()).await, true);

    assert_eq!(source.activate().await, SourceState::Simulated);
    assert!(source.last_error().unwrap().contains("503"));
    assert_eq!(camera.requests.lock().unwrap().len(), 3);

    let frame = source.capture().await.expect("疑似映像の撮影失敗");
    assert!(frame.simulated);

    camera.healthy.store(true, Ordering::SeqCst);
    assert_eq!(source.activate().await, SourceState::Streaming);
    assert!(!source.capture().await.expect("撮影失敗").simulated);
}

/// 疑似映像が無効なら Error で撮影できない
#[tokio::test]
async fn test_error_when_simulation_disabled() {
    let camera = MockCamera::new(false, false);
    let mut source = source(serve(camera).await, false);

    assert_eq!(source.activate().await, SourceState::Error);
    assert!(source.capture().await.is_err());
}

/// 撮影中にカメラが落ちたら疑似フレームで代替（状態は Streaming のまま）
#[tokio::test]
async fn test_snapshot_failure_while_streaming() {
    let camera = MockCamera::new(true, false);
    let mut source = source(serve(camera.clone()).await, true);
    assert_eq!(source.activate().await, SourceState::Streaming);

    camera.healthy.store(false, Ordering::SeqCst);
    let frame = source.capture().await.expect("代替フレームの取得失敗");
    assert!(frame.simulated);
    assert_eq!(source.state(), SourceState::Streaming);
    assert!(source.last_error().unwrap().contains("503"));

    // 復旧すれば再接続なしで実映像に戻る
    camera.healthy.store(true, Ordering::SeqCst);
    assert!(!source.capture().await.expect("撮影失敗").simulated);

    source.release();
    assert_eq!(source.state(), SourceState::Idle);
    assert!(source.active_profile().is_none());
}

/// 疑似映像が無効なら撮影中の失敗はエラー
#[tokio::test]
async fn test_snapshot_failure_without_simulation() {
    let camera = MockCamera::new(true, false);
    let mut source = source(serve(camera.clone()).await, false);
    assert_eq!(source.activate().await, SourceState::Streaming);

    camera.healthy.store(false, Ordering::SeqCst);
    assert!(source.capture().await.is_err());
    assert_eq!(source.state(), SourceState::Streaming);
}
