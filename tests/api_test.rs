// End-to-end tests over the router, without touching any upstream service.
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use jyotish_api::config::{Config, GeoConfig, OpenAiConfig, ProkeralaConfig, ServerConfig};
use jyotish_api::providers::{ScriptedAstro, ScriptedChat};
use jyotish_api::routes::create_router;
use jyotish_api::state::AppState;

fn offline_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        prokerala: ProkeralaConfig {
            client_id: None,
            client_secret: None,
            base_url: "https://api.prokerala.com/v2".to_string(),
        },
        openai: OpenAiConfig {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        },
        geo: GeoConfig {
            locationiq_key: None,
        },
        allow_origins: "*".to_string(),
        http_timeout_seconds: 5,
    }
}

fn app() -> Router {
    create_router(AppState::new(offline_config()).unwrap())
}

fn app_with_scripted(replies: &[&str]) -> Router {
    let state = AppState::new(offline_config())
        .unwrap()
        .with_model(Arc::new(ScriptedChat::new(replies.iter().copied())));
    create_router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn sample_compute() -> Value {
    json!({
        "kundli": {
            "data": {
                "nakshatra_details": {
                    "chandra_rasi": {"name": "Karka"},
                    "nakshatra": {"name": "Pushya"}
                }
            }
        },
        "divisional": {
            "lagna": {
                "data": {
                    "divisional_positions": [
                        {
                            "rasi": {"name": "Mesha"},
                            "house": {"number": 1},
                            "planet_positions": [
                                {"planet": {"name": "Sun"}, "sign_degree": 14.2},
                                {"planet": {"name": "Ascendant"}, "sign_degree": 3.0}
                            ]
                        }
                    ]
                }
            }
        },
        "transits": null,
        "meta": {
            "provider": "prokerala",
            "ayanamsa": 1,
            "language": "en",
            "advanced": true,
            "birth": {
                "date": "1990-04-12",
                "time": "06:45:00",
                "timezone": "+05:30",
                "latitude": 12.9716,
                "longitude": 77.5946,
                "location": "Bangalore, India"
            },
            "effective_datetime": "1990-04-12T06:45:00+05:30"
        }
    })
}

#[tokio::test]
async fn health_reports_capabilities() {
    let response = app()
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["has_openai"], json!(false));
    assert_eq!(body["account_bound"], json!(false));
}

#[tokio::test]
async fn geo_resolve_requires_query() {
    let response = app()
        .oneshot(Request::get("/api/geo/resolve").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["detail"], json!("q required"));

    let response = app()
        .oneshot(
            Request::get("/api/geo/resolve?q=%20%20")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn analyze_renders_deterministic_summary() {
    let response = app()
        .oneshot(post_json("/api/analyze", json!({"compute": sample_compute()})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let analysis = body["analysis"].as_str().unwrap();
    assert!(analysis.contains("Natal Summary"));
    assert!(analysis.contains("Pushya"));
}

#[tokio::test]
async fn analyze_llm_requires_api_key() {
    let response = app()
        .oneshot(post_json(
            "/api/analyze-llm",
            json!({"compute": sample_compute()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("OpenAI API key not configured"));
}

#[tokio::test]
async fn chat_requires_message_and_context() {
    let response = app_with_scripted(&["unused"])
        .oneshot(post_json("/api/chat", json!({"message": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app_with_scripted(&["unused"])
        .oneshot(post_json("/api/chat", json!({"message": "career?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("context required"));
}

#[tokio::test]
async fn chat_answers_from_available_charts() {
    // The provider is unconfigured, so extra chart fetches fail and get
    // skipped; the scripted model concludes on its first reply.
    let response = app_with_scripted(&["Saturn rewards patience.\nNEXT_CHARTS: none"])
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "how is my career looking?", "context": sample_compute()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["reply"], json!("Saturn rewards patience."));
    assert_eq!(body["refinement"], json!(1));
    let used: Vec<String> = body["used_charts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(used.contains(&"lagna".to_string()));
    assert!(used.contains(&"dasamsa".to_string()));
}

#[tokio::test]
async fn chat_iteration_bound_is_honored() {
    // Every reply asks for yet another chart; the loop must still stop.
    let response = app_with_scripted(&[
        "more\nNEXT_CHARTS: D2",
        "more\nNEXT_CHARTS: D3",
        "more\nNEXT_CHARTS: D4",
        "done\nNEXT_CHARTS: D7",
    ])
    .oneshot(post_json(
        "/api/chat",
        json!({
            "message": "tell me everything",
            "context": sample_compute(),
            "max_iterations": 3
        }),
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["refinement"].as_u64().unwrap() <= 3);
}

#[tokio::test]
async fn chat_streams_sse_events() {
    let response = app_with_scripted(&["Streamed reply.\nNEXT_CHARTS: none"])
        .oneshot(post_json(
            "/api/chat",
            json!({"message": "hello", "context": sample_compute(), "stream": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("event: token"));
    assert!(text.contains("event: done"));
    assert!(text.contains("Streamed reply."));
}

#[tokio::test]
async fn chart_renders_svg_from_compute_payload() {
    let response = app()
        .oneshot(post_json(
            "/api/chart",
            json!({"compute": sample_compute(), "chart_type": "D1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/svg+xml"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let svg = String::from_utf8_lossy(&bytes);
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("Su"));
}

#[tokio::test]
async fn chart_rejects_unknown_type_and_style() {
    let response = app()
        .oneshot(post_json(
            "/api/chart",
            json!({"compute": sample_compute(), "chart_type": "D99"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app()
        .oneshot(post_json(
            "/api/chart",
            json!({
                "compute": sample_compute(),
                "chart_type": "navamsa"
            }),
        ))
        .await
        .unwrap();
    // navamsa is a valid type but absent from the computed payload
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app()
        .oneshot(post_json(
            "/api/chart",
            json!({
                "compute": sample_compute(),
                "chart_type": "lagna",
                "chart_style": "east-indian"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn compute_survives_a_failing_divisional_chart() {
    // One chart refusing upstream must not abort the request; it becomes
    // an inline error marker while everything else comes back normally.
    let astro = ScriptedAstro {
        kundli: json!({"data": {"nakshatra_details": {"chandra_rasi": {"name": "Karka"}}}}),
        fail_charts: vec!["navamsa".to_string()],
        ..ScriptedAstro::default()
    };
    let state = AppState::new(offline_config())
        .unwrap()
        .with_astro(Arc::new(astro));
    let response = create_router(state)
        .oneshot(post_json(
            "/api/compute",
            json!({
                "birth": {
                    "date": "1990-04-12",
                    "time": "06:45",
                    "timezone": "+05:30",
                    "latitude": 12.9716,
                    "longitude": 77.5946
                },
                "include_divisional": ["lagna", "navamsa"]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert!(body["divisional"]["navamsa"]["error"].is_string());
    assert!(body["divisional"]["lagna"].get("error").is_none());
    assert_eq!(
        body["kundli"]["data"]["nakshatra_details"]["chandra_rasi"]["name"],
        json!("Karka")
    );
    assert_eq!(body["meta"]["advanced"], json!(true));
    assert_eq!(body["meta"]["birth"]["timezone"], json!("+05:30"));
    assert_eq!(body["meta"]["birth"]["time"], json!("06:45:00"));
    assert_eq!(
        body["meta"]["effective_datetime"],
        json!("1990-04-12T06:45:00+05:30")
    );
    assert!(body["transits"].get("error").is_none());
}

#[tokio::test]
async fn compute_requires_location_or_coordinates() {
    let response = app()
        .oneshot(post_json(
            "/api/compute",
            json!({"birth": {"date": "1990-04-12", "time": "06:45"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("coordinates or a location"));
}
