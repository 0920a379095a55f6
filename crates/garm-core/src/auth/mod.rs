mod claims;
mod instance_token;

pub use claims::{AdminClaims, AdminClaimsBuilder};
pub use instance_token::InstanceTokenClaims;
