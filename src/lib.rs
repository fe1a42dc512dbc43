pub mod elements;
pub mod flow;
pub mod packet;
pub mod queue;
pub mod sim;
pub mod topo;

#[cfg(test)]
mod test;
