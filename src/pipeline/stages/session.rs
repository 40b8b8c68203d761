use std::sync::Arc;

use async_trait::async_trait;
use http::{header, HeaderValue};
use log::debug;
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::{
    core::{context::Session, RequestContext, SessionProvider, SiteResult},
    pipeline::{Next, StageHandler},
};

use super::stage_config;

pub const STAGE_NAME: &str = "session";

const DEFAULT_COOKIE: &str = "folio_session";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SessionConfig {
    cookie: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie: DEFAULT_COOKIE.to_string(),
        }
    }
}

/// Binds a session to the request and writes it back once the chain returns.
///
/// A fresh session is only persisted, and its cookie only issued, once a later
/// stage stores something in it. Clearing `ctx.session` destroys the session.
pub struct SessionStage {
    sessions: Arc<dyn SessionProvider>,
}

impl SessionStage {
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl StageHandler for SessionStage {
    async fn run(
        &self,
        ctx: &mut RequestContext,
        config: &JsonValue,
        next: Next<'_>,
    ) -> SiteResult<()> {
        let config: SessionConfig = stage_config(STAGE_NAME, config)?;

        let existing = match ctx.cookie(&config.cookie).map(str::to_string) {
            Some(id) => self.sessions.load(&id).await?.map(|data| (id, data)),
            None => None,
        };
        let session = match existing {
            Some((id, data)) => Session::new(id, data, false),
            None => Session::new(uuid::Uuid::new_v4().to_string(), JsonMap::new(), true),
        };
        let id = session.id.clone();
        let was_new = session.is_new;
        ctx.session = Some(session);

        next.run(ctx).await?;

        let Some(session) = ctx.session.as_mut() else {
            if !was_new {
                debug!("Destroying session {id}");
                self.sessions.destroy(&id).await?;
            }
            return Ok(());
        };

        if session.is_dirty() && !(session.is_new && session.data.is_empty()) {
            self.sessions.save(&session.id, &session.data).await?;
            session.mark_clean();

            if session.is_new {
                let cookie = format!("{}={}; Path=/; HttpOnly", config.cookie, session.id);
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    ctx.response.headers.append(header::SET_COOKIE, value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::{
        adapters::MemorySessionStore,
        pipeline::{Pipeline, StageHandler},
    };

    struct Login;

    #[async_trait]
    impl StageHandler for Login {
        async fn run(
            &self,
            ctx: &mut RequestContext,
            _config: &JsonValue,
            _next: Next<'_>,
        ) -> SiteResult<()> {
            match ctx.path.as_str() {
                "/login" => {
                    if let Some(session) = ctx.session.as_mut() {
                        session.insert("user", JsonValue::from("ada"));
                    }
                }
                "/logout" => ctx.session = None,
                _ => {}
            }
            Ok(())
        }
    }

    fn pipeline(store: Arc<MemorySessionStore>) -> Pipeline {
        let pipeline = Pipeline::new("default");
        pipeline
            .add_state(STAGE_NAME, Arc::new(SessionStage::new(store)), 700, JsonValue::Null)
            .unwrap();
        pipeline
            .add_state("login", Arc::new(Login), 0, JsonValue::Null)
            .unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_anonymous_session_is_not_stored() {
        let store = Arc::new(MemorySessionStore::new());
        let pipeline = pipeline(store.clone());

        let mut ctx = RequestContext::new(Method::GET, "/");
        pipeline.execute(&mut ctx).await;
        assert!(ctx.session.as_ref().unwrap().is_new);
        assert!(store.is_empty());
        assert!(ctx.response.headers.get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_session_round_trip_and_logout() {
        let store = Arc::new(MemorySessionStore::new());
        let pipeline = pipeline(store.clone());

        let mut ctx = RequestContext::new(Method::POST, "/login");
        pipeline.execute(&mut ctx).await;
        assert_eq!(store.len(), 1);
        let cookie = ctx
            .response
            .headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        let pair = cookie.split(';').next().unwrap().to_string();
        assert!(pair.starts_with("folio_session="));

        let mut ctx = RequestContext::new(Method::GET, "/").with_header(header::COOKIE, &pair);
        pipeline.execute(&mut ctx).await;
        let session = ctx.session.as_ref().unwrap();
        assert!(!session.is_new);
        assert_eq!(session.get("user"), Some(&JsonValue::from("ada")));
        assert!(ctx.response.headers.get(header::SET_COOKIE).is_none());

        let mut ctx = RequestContext::new(Method::GET, "/logout").with_header(header::COOKIE, &pair);
        pipeline.execute(&mut ctx).await;
        assert!(store.is_empty());
    }
}
