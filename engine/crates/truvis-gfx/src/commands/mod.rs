pub mod upload_heap;
