pub mod handler;

pub use handler::{
	administrative_reset, enqueue_one, queue_status, retrieve_recent, simulate_bulk,
};

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn module_loaded() {
		let _ = std::mem::size_of::<crate::model::Message>();
	}
}
