pub mod account;
pub mod api_keys;
pub mod session;

pub use account::GetAccountHandler;
pub use api_keys::{
    CreateApiKeyHandler, ListApiKeysHandler, RevokeApiKeyHandler, UpdateApiKeyHandler,
};
pub use session::{LoginHandler, LogoutHandler, RefreshHandler, SignupHandler};
