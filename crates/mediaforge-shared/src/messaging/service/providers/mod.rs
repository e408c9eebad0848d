pub mod amqp;
pub mod in_memory;
