pub mod approval;
pub mod negotiation;
pub mod procurement;
pub mod session;
