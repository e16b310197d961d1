pub mod error;
pub mod instance;
pub mod load_balancer;
pub mod registry;

pub use error::GatewayError;
pub use instance::{HealthStatus, RegisterRequest, ServiceInstance};
pub use load_balancer::{LoadBalancer, SelectionStrategy};
pub use registry::ServiceRegistry;
