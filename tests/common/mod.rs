use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use helpdesk::auth::{password, Role};
use helpdesk::config::AppConfig;
use helpdesk::db::{self, PgPool, MIGRATIONS};
use helpdesk::models::{Job, NewCategory, NewTicketType, NewUser, Notification, TicketHistory};
use helpdesk::notifications::builders::BuilderRegistry;
use helpdesk::notifications::chat::{ChatClient, ChatError, ChatMessage};
use helpdesk::notifications::dispatcher::{DeliveryOutcome, NotificationDispatcher};
use helpdesk::notifications::{NotificationQueue, NotificationReceiver};
use helpdesk::routes;
use helpdesk::state::AppState;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct SentMessage {
    pub email: String,
    pub conversation_id: String,
    pub message: ChatMessage,
}

/// In-memory chat service. Chat user ids are the email addresses.
#[derive(Default)]
pub struct FakeChatClient {
    sent: Mutex<Vec<SentMessage>>,
    unreachable: AtomicBool,
}

#[async_trait]
impl ChatClient for FakeChatClient {
    async fn find_user_by_email(&self, email: &str) -> Result<String, ChatError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ChatError::UserLookup("connection refused".to_string()));
        }
        Ok(email.to_string())
    }

    async fn open_conversation(&self, chat_user_id: &str) -> Result<String, ChatError> {
        Ok(format!("dm-{chat_user_id}"))
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ChatError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ChatError::MessageSend("connection refused".to_string()));
        }
        let email = conversation_id.trim_start_matches("dm-").to_string();
        self.sent.lock().await.push(SentMessage {
            email,
            conversation_id: conversation_id.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}

impl FakeChatClient {
    #[allow(dead_code)]
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    chat: Arc<FakeChatClient>,
    dispatcher: NotificationDispatcher,
    receiver: Mutex<NotificationReceiver>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_queue_capacity(64).await
    }

    pub async fn with_queue_capacity(capacity: usize) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            chat_api_base_url: None,
            chat_api_token: None,
            chat_timeout: Duration::from_secs(2),
            notification_queue_capacity: capacity,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let chat = Arc::new(FakeChatClient::default());
        let chat_for_dispatcher: Arc<dyn ChatClient> = chat.clone();
        let dispatcher = NotificationDispatcher::new(
            pool.clone(),
            chat_for_dispatcher,
            BuilderRegistry::default(),
            config.chat_timeout,
        );
        let (notifications, receiver) =
            NotificationQueue::channel(config.notification_queue_capacity);

        let jwt = helpdesk::auth::jwt::JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, jwt, notifications);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            chat,
            dispatcher,
            receiver: Mutex::new(receiver),
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn chat(&self) -> Arc<FakeChatClient> {
        self.chat.clone()
    }

    /// Dispatches every event queued so far, in order.
    #[allow(dead_code)]
    pub async fn deliver_notifications(&self) -> Vec<DeliveryOutcome> {
        let mut receiver = self.receiver.lock().await;
        let mut outcomes = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            outcomes.extend(self.dispatcher.dispatch(&event).await);
        }
        outcomes
    }

    pub async fn insert_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email: format!("{username}@example.com"),
                username,
                password_hash: password::hash_password(&password)?,
                role,
            };
            diesel::insert_into(helpdesk::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_category(&self, name: &str, parent_id: Option<Uuid>) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let category = NewCategory {
                id: Uuid::new_v4(),
                name,
                parent_id,
            };
            diesel::insert_into(helpdesk::schema::categories::table)
                .values(&category)
                .execute(conn)
                .context("failed to insert category")?;
            Ok(category.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_ticket_type(&self, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let ticket_type = NewTicketType {
                id: Uuid::new_v4(),
                name,
            };
            diesel::insert_into(helpdesk::schema::ticket_types::table)
                .values(&ticket_type)
                .execute(conn)
                .context("failed to insert ticket type")?;
            Ok(ticket_type.id)
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response missing access_token"))
    }

    #[allow(dead_code)]
    pub async fn history_rows(&self, ticket_id: Uuid) -> Result<Vec<TicketHistory>> {
        self.with_conn(move |conn| {
            use helpdesk::schema::ticket_histories::dsl;
            dsl::ticket_histories
                .filter(dsl::ticket_id.eq(ticket_id))
                .order((dsl::created_at.asc(), dsl::id.asc()))
                .load(conn)
                .context("failed to load history")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn notifications_for(&self, ticket_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(move |conn| {
            use helpdesk::schema::notifications::dsl;
            dsl::notifications
                .filter(dsl::ticket_id.eq(ticket_id))
                .order(dsl::created_at.asc())
                .load(conn)
                .context("failed to load notifications")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use helpdesk::schema::jobs::dsl::{job_type as job_type_col, jobs as jobs_table};
            jobs_table
                .filter(job_type_col.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

/// Catalog rows most ticket tests need.
#[allow(dead_code)]
pub struct Catalog {
    pub category_id: Uuid,
    pub subcategory_id: Uuid,
    pub other_category_id: Uuid,
    pub type_id: Uuid,
}

#[allow(dead_code)]
pub async fn seed_catalog(app: &TestApp) -> Result<Catalog> {
    let category_id = app.insert_category("Hardware", None).await?;
    let subcategory_id = app.insert_category("Laptops", Some(category_id)).await?;
    let other_category_id = app.insert_category("Accounts", None).await?;
    let type_id = app.insert_ticket_type("Incident").await?;
    Ok(Catalog {
        category_id,
        subcategory_id,
        other_category_id,
        type_id,
    })
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE notifications, ticket_comments, ticket_histories, tickets, \
         monthly_statistics, jobs, refresh_tokens, categories, ticket_types, users \
         RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
