//! In-memory todo API.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example todo
//!
//! Try:
//!   curl http://localhost:8080/todos
//!   curl http://localhost:8080/todos/1
//!   curl -X POST http://localhost:8080/todos \
//!        -H 'content-type: application/json' \
//!        -d '{"title":"write docs","completed":false}'
//!   curl -X PUT http://localhost:8080/todos/3 \
//!        -H 'content-type: application/json' \
//!        -d '{"title":"Share it with the world","completed":true}'
//!   curl -X DELETE http://localhost:8080/todos/2
//!   curl -i -X OPTIONS http://localhost:8080/todos

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use http::StatusCode;
use serde::{Deserialize, Serialize};
use vibe::middleware::{cors, trace, CorsConfig};
use vibe::{json, Error, Logger, Request, ResponseWriter, Router, Server};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Todo {
    #[serde(default)]
    id: u64,
    title: String,
    #[serde(default)]
    completed: bool,
}

#[derive(Default)]
struct Store {
    todos: BTreeMap<u64, Todo>,
    next_id: u64,
}

#[derive(Default)]
struct TodoStore(RwLock<Store>);

impl TodoStore {
    fn seeded() -> Self {
        let store = Self::default();
        store.create("Learn Rust", true);
        store.create("Build a web framework", true);
        store.create("Share it with the world", false);
        store
    }

    fn all(&self) -> Vec<Todo> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).todos.values().cloned().collect()
    }

    fn get(&self, id: u64) -> Option<Todo> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).todos.get(&id).cloned()
    }

    fn create(&self, title: &str, completed: bool) -> Todo {
        let mut store = self.0.write().unwrap_or_else(PoisonError::into_inner);
        store.next_id += 1;
        let todo = Todo { id: store.next_id, title: title.to_owned(), completed };
        store.todos.insert(todo.id, todo.clone());
        todo
    }

    fn update(&self, id: u64, mut todo: Todo) -> Option<Todo> {
        let mut store = self.0.write().unwrap_or_else(PoisonError::into_inner);
        let slot = store.todos.get_mut(&id)?;
        todo.id = id;
        *slot = todo.clone();
        Some(todo)
    }

    fn delete(&self, id: u64) -> bool {
        self.0.write().unwrap_or_else(PoisonError::into_inner).todos.remove(&id).is_some()
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    vibe::logging::init()?;

    let addr = std::env::var("ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let store = Arc::new(TodoStore::seeded());

    let router = Router::new();
    router
        .use_middleware(trace(Logger::default()))
        .use_middleware(cors(CorsConfig::default())?);

    let todos = router.group("/todos");

    let s = Arc::clone(&store);
    todos.get("", move |req: Request, w: ResponseWriter| list(Arc::clone(&s), req, w));
    let s = Arc::clone(&store);
    todos.get("/{id}", move |req: Request, w: ResponseWriter| show(Arc::clone(&s), req, w));
    let s = Arc::clone(&store);
    todos.post("", move |req: Request, w: ResponseWriter| create(Arc::clone(&s), req, w));
    let s = Arc::clone(&store);
    todos.put("/{id}", move |req: Request, w: ResponseWriter| update(Arc::clone(&s), req, w));
    let s = Arc::clone(&store);
    todos.delete("/{id}", move |req: Request, w: ResponseWriter| remove(Arc::clone(&s), req, w));

    // Browser preflights only see CORS headers on a matched OPTIONS route.
    todos.options("", preflight).options("/{id}", preflight);

    Server::bind(&addr)?.serve(router).await
}

/// Never reached: the CORS middleware answers `OPTIONS` itself.
async fn preflight(_req: Request, _w: ResponseWriter) -> Result<(), Error> {
    Ok(())
}

fn todo_id(req: &Request) -> Option<u64> {
    req.param("id")?.parse().ok()
}

async fn list(store: Arc<TodoStore>, _req: Request, w: ResponseWriter) -> Result<(), Error> {
    json::write(&w, StatusCode::OK, &store.all())
}

async fn show(store: Arc<TodoStore>, req: Request, w: ResponseWriter) -> Result<(), Error> {
    let Some(id) = todo_id(&req) else {
        return json::bad_request(&w, "invalid todo id");
    };
    match store.get(id) {
        Some(todo) => json::write(&w, StatusCode::OK, &todo),
        None => json::not_found(&w, Some("todo not found")),
    }
}

async fn create(store: Arc<TodoStore>, req: Request, w: ResponseWriter) -> Result<(), Error> {
    let todo: Todo = match json::decode(&req) {
        Ok(todo) => todo,
        Err(e) => return json::bad_request(&w, &e.to_string()),
    };
    let created = store.create(&todo.title, todo.completed);
    json::write(&w, StatusCode::CREATED, &created)
}

async fn update(store: Arc<TodoStore>, req: Request, w: ResponseWriter) -> Result<(), Error> {
    let Some(id) = todo_id(&req) else {
        return json::bad_request(&w, "invalid todo id");
    };
    let todo: Todo = match json::decode(&req) {
        Ok(todo) => todo,
        Err(e) => return json::bad_request(&w, &e.to_string()),
    };
    match store.update(id, todo) {
        Some(updated) => json::write(&w, StatusCode::OK, &updated),
        None => json::not_found(&w, Some("todo not found")),
    }
}

async fn remove(store: Arc<TodoStore>, req: Request, w: ResponseWriter) -> Result<(), Error> {
    let Some(id) = todo_id(&req) else {
        return json::bad_request(&w, "invalid todo id");
    };
    if !store.delete(id) {
        return json::not_found(&w, Some("todo not found"));
    }
    w.write_header(StatusCode::NO_CONTENT);
    Ok(())
}
