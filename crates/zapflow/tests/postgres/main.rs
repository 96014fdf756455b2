//! PostgreSQL integration tests. Requires `TEST_ADMIN_DATABASE_URL`.

mod pipeline;
mod store;
mod stream;
mod support;
