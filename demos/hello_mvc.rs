//! A small guest book served by rmvc.
//!
//! ```text
//! cargo run --example hello_mvc [config.json]
//! ```
//!
//! Routes:
//! - `GET  /`                      visit counter kept in the session
//! - `GET  /hello/<name>`          greeting bound from a named capture group
//! - `GET  /sign` / `POST /sign`   form protected by a CSRF token
//! - `GET  /mvc/action/Guestbook.entries` direct action call

use std::sync::{Arc, LazyLock, Mutex};

use bytes::Bytes;
use rmvc::controller::{ActionResult, ActionTable, BoxError, BoxFuture, Controller};
use rmvc::security::{csrf, escape_html};
use rmvc::{Application, Config, Request, Response, Server, SessionMode};
use tracing_subscriber::EnvFilter;

static ENTRIES: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct Guestbook;

fn index<'a>(_: &'a Guestbook, req: &'a mut Request, _: &'a mut Response) -> BoxFuture<'a, ActionResult> {
    Box::pin(async move {
        let visits = req.session().get_as::<u64>("visits").unwrap_or(0) + 1;
        req.session_mut().set("visits", visits);
        Ok(Some(Bytes::from(format!(
            "<h1>Guest book</h1><p>Visit #{visits}.</p><p><a href=\"/sign\">Sign it</a></p>"
        ))))
    })
}

fn hello<'a>(_: &'a Guestbook, req: &'a mut Request, _: &'a mut Response) -> BoxFuture<'a, ActionResult> {
    Box::pin(async move {
        let name = req.route_params().get_str("name").unwrap_or("stranger");
        Ok(Some(Bytes::from(format!("<p>Hello, {}!</p>", escape_html(name)))))
    })
}

fn sign_form<'a>(_: &'a Guestbook, req: &'a mut Request, _: &'a mut Response) -> BoxFuture<'a, ActionResult> {
    Box::pin(async move {
        let token = csrf::generate_token(req.session_mut());
        Ok(Some(Bytes::from(format!(
            "<form method=\"post\" action=\"/sign\">\
             <input type=\"hidden\" name=\"{}\" value=\"{token}\">\
             <input name=\"message\"><button>Sign</button></form>",
            csrf::TOKEN_FIELD
        ))))
    })
}

fn sign<'a>(_: &'a Guestbook, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, ActionResult> {
    Box::pin(async move {
        if !csrf::check_token(req) {
            return Err("invalid CSRF token".into());
        }
        if let Some(message) = req.form().get_str("message") {
            ENTRIES
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(message.to_owned());
        }
        res.redirect("/mvc/action/Guestbook.entries")?;
        Ok::<_, BoxError>(None)
    })
}

fn entries<'a>(_: &'a Guestbook, _: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, ActionResult> {
    Box::pin(async move {
        res.set_content_type("application/json")?;
        let entries = ENTRIES
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        Ok::<_, BoxError>(Some(Bytes::from(serde_json::to_vec(&entries)?)))
    })
}

static ACTIONS: LazyLock<ActionTable<Guestbook>> = LazyLock::new(|| {
    ActionTable::new()
        .action("index", index)
        .action("hello", hello)
        .action("sign_form", sign_form)
        .action("sign", sign)
        .direct("entries", entries)
});

#[async_trait::async_trait]
impl Controller for Guestbook {
    fn has_action(&self, name: &str) -> bool {
        ACTIONS.contains(name)
    }

    fn is_direct_action_call_allowed(&self, name: &str) -> bool {
        ACTIONS.is_direct(name)
    }

    async fn execute_action(&self, name: &str, req: &mut Request, res: &mut Response) -> ActionResult {
        ACTIONS.call(self, name, req, res).await
    }
}

const ROUTES: &str = r#"{
    "home":      {"pattern": "^/$", "controllerIdentifier": "Guestbook", "action": "index", "httpVerbs": "GET"},
    "hello":     {"pattern": "^/hello/(?P<name>[^/]+)$", "controllerIdentifier": "Guestbook", "action": "hello"},
    "sign-form": {"pattern": "^/sign$", "controllerIdentifier": "Guestbook", "action": "sign_form", "httpVerbs": "GET"},
    "sign":      {"pattern": "^/sign$", "controllerIdentifier": "Guestbook", "action": "sign", "httpVerbs": "POST"}
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rmvc=debug")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_json_file(path)?,
        None => Config {
            debug: true,
            session_mode: SessionMode::Memory,
            ..Config::default()
        },
    };

    let server = Server::bind(config.server_addr()).await?;
    let mut app = Application::new(config)?;
    app.router_mut().register_controller("Guestbook", || Box::new(Guestbook));
    app.router_mut().load_routes_from_json(ROUTES)?;

    println!("Listening on http://{}", server.local_addr());
    server
        .run_until(Arc::new(app), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
