// Block detection, CAPTCHA escalation and request fingerprint headers.

pub mod detectors;
pub mod handler;
pub mod user_agents;
