//! # Session Test Utilities
//!
//! Fakes for every external capability of the session controller, so
//! controller scenarios run without a real-time SDK, capture hardware or a
//! credential endpoint.
//!
//! ## Modules
//!
//! - `mock_transport` - Scriptable channel client plus its factory
//! - `mock_devices` - Capture stack with configurable cameras/microphones
//! - `mock_token` - Token source with scripted responses, identity authority
//! - `fixtures` - Session configs and state helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let transport = FakeTransport::new();
//!     let devices = FakeMediaDevices::new()
//!         .with_camera("cam-1")
//!         .with_microphone("mic-1");
//!     let tokens = MockTokenSource::accepting();
//!
//!     let controller = SessionController::spawn(
//!         &transport.factory(),
//!         Arc::new(tokens),
//!         Arc::new(devices),
//!         RetryPolicy::default(),
//!     );
//!     controller.join(guest_config("apt-1"), None).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_devices;
pub mod mock_token;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_devices::*;
pub use mock_token::*;
pub use mock_transport::*;
