fn main() {
    cfstream_dl_lib::run()
}
