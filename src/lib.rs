pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod token;
}

pub mod models {
    pub mod actor;
    pub mod checkin;
    pub mod session;
    pub mod token;
}

pub mod repositories {
    pub mod attempt;
    pub mod memory;
    pub mod session;
}

pub mod services {
    pub mod anomaly;
    pub mod checkin;
    pub mod notifications;
    pub mod review;
}

pub mod handlers {
    pub mod checkins;
    pub mod response;
    pub mod sessions;
    pub mod tokens;
}

pub mod middleware_layer {
    pub mod actor;
}

pub mod validation {
    pub mod session_form;
}
