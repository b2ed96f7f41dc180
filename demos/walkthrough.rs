use std::io::Read;

use tagalloc::{Allocator, AllocatorConfig, BlockPtr, FitPolicy, IndexKind};

/// Waits until the user presses ENTER, unless `--no-wait` was given.
fn block_until_enter_pressed(wait: bool) {
  if !wait {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints every block from the first ordinary block up to the epilogue.
fn print_heap(
  label: &str,
  allocator: &Allocator,
) {
  println!("[{label}] heap = {} bytes", allocator.heap_size());
  for block in allocator.blocks() {
    println!(
      "    {:>6}  {:>6} bytes  {}",
      block.ptr.offset(),
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn print_alloc(
  size: usize,
  ptr: BlockPtr,
  allocator: &Allocator,
) {
  println!(
    "Allocated {} bytes at offset {}, block size = {}",
    size,
    ptr.offset(),
    allocator.block(ptr).size
  );
}

fn main() -> tagalloc::Result<()> {
  env_logger::init();

  let wait = !std::env::args().any(|arg| arg == "--no-wait");

  let index = match std::env::args().find_map(|arg| arg.strip_prefix("--index=").map(str::to_owned)).as_deref() {
    Some("implicit") => IndexKind::Implicit,
    Some("segregated") => IndexKind::Segregated,
    _ => IndexKind::Explicit,
  };
  let fit = match std::env::args().find_map(|arg| arg.strip_prefix("--fit=").map(str::to_owned)).as_deref() {
    Some("next") => FitPolicy::NextFit,
    Some("best") => FitPolicy::BestFit,
    Some("worst") => FitPolicy::WorstFit,
    _ => FitPolicy::FirstFit,
  };

  let mut allocator = Allocator::with_config(AllocatorConfig::new(index, fit))?;
  println!("Using a {index:?} index with {fit:?}");

  // Initial heap: one free chunk between the sentinels.
  print_heap("start", &allocator);
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 1) A 4-byte request still takes a minimum block of 16 bytes.
  // --------------------------------------------------------------------
  let first = allocator.allocate(4)?.expect("non-zero request");
  println!("\n[1] Allocate 4 bytes");
  print_alloc(4, first, &allocator);
  allocator.payload_mut(first)[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  print_heap("1", &allocator);
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 2) Two more blocks, so the first one gets neighbors.
  // --------------------------------------------------------------------
  let second = allocator.allocate(12)?.expect("non-zero request");
  let third = allocator.allocate(100)?.expect("non-zero request");
  println!("\n[2] Allocate 12 and 100 bytes");
  print_alloc(12, second, &allocator);
  print_alloc(100, third, &allocator);
  print_heap("2", &allocator);
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 3) Free the first block: it sits between the prologue and an
  //    allocated block, so nothing merges.
  // --------------------------------------------------------------------
  allocator.free(first);
  println!("\n[3] Freed block at offset {}", first.offset());
  print_heap("3", &allocator);
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 4) Free the second block: it merges with the free block before it.
  // --------------------------------------------------------------------
  allocator.free(second);
  println!("\n[4] Freed block at offset {}", second.offset());
  print_heap("4", &allocator);
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 5) A small request; whether it lands in the hole depends on the policy.
  // --------------------------------------------------------------------
  let fifth = allocator.allocate(2)?.expect("non-zero request");
  println!("\n[5] Allocate 2 bytes");
  print_alloc(2, fifth, &allocator);
  println!(
    "[5] reused the hole at the front? {}",
    if fifth == first { "Yes" } else { "No" }
  );
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 6) Resize moves the block and keeps its contents.
  // --------------------------------------------------------------------
  allocator.payload_mut(third)[..5].copy_from_slice(b"hello");
  let third = allocator.resize(third, 600)?.expect("non-zero request");
  println!(
    "\n[6] Resized to 600 bytes at offset {}, payload starts with {:?}",
    third.offset(),
    std::str::from_utf8(&allocator.payload(third)[..5]).unwrap_or("?")
  );
  print_heap("6", &allocator);
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 7) A 64 KiB request does not fit anywhere and grows the heap.
  // --------------------------------------------------------------------
  let before = allocator.heap_size();
  let big = allocator.allocate(64 * 1024)?.expect("non-zero request");
  println!("\n[7] Allocate 64 KiB");
  print_alloc(64 * 1024, big, &allocator);
  println!("[7] heap grew from {} to {} bytes", before, allocator.heap_size());
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 8) Release everything and verify the heap.
  // --------------------------------------------------------------------
  for ptr in [fifth, third, big] {
    allocator.free(ptr);
  }
  let stats = allocator.check().expect("heap is consistent");
  print_heap("8", &allocator);
  println!(
    "\n[8] {} free block(s), {} free bytes. End of walkthrough.",
    stats.free_blocks, stats.free_bytes
  );

  Ok(())
}
