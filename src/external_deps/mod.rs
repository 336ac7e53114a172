//! Integrations that rely on third-party services.
//!
//! This module groups the hosted scraping API client and the captcha
//! providers that bridge the fetch layer with the outside world.

pub mod captcha;
pub mod remote_api;

pub use captcha::TwoCaptchaProvider;
pub use remote_api::RemoteApiClient;
