//! Wire protocols spoken with clients and upstream services.

pub(crate) mod websocket;
