use brkheap::{Heap, HeapError, SystemBreak};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn dump(heap: &Heap<SystemBreak>) {
    let mut out = String::new();
    heap.meminfo(&mut out).unwrap();
    println!("{out}");
}

fn main() -> Result<(), HeapError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let mut heap = Heap::system();

    let a = heap.allocate(16)?;
    log_alloc(a.as_ptr(), 16);

    let b = heap.allocate(32)?;
    log_alloc(b.as_ptr(), 32);

    let c = heap.allocate(64)?;
    log_alloc(c.as_ptr(), 64);

    dump(&heap);

    unsafe { heap.release(b) };

    // Reuses the chunk b just gave back.
    let d = heap.allocate(8)?;
    log_alloc(d.as_ptr(), 8);
    println!("d reused b: {}\n", d == b);

    dump(&heap);

    unsafe {
        heap.release(c);
        heap.release(d);
        heap.release(a);
    }

    dump(&heap);

    Ok(())
}
